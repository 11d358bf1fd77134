// Chassis controller: command shaping, kinematics dispatch, periodic tick
//
// Control flow:  command -> shaping -> kinematics -> modules -> actuators
// Sensing flow:  modules -> kinematics (speed query)
//                modules + gyro -> estimator (+ queued corrections)

use std::collections::VecDeque;

use tracing::{debug, info, trace};

use super::estimator::{PoseCorrection, PoseEstimator};
use super::hardware::{HeadingSensor, ModuleHardware};
use super::kinematics::{
    desaturate_wheel_speeds, KinematicsError, ModulePosition, ModuleState, SwerveKinematics,
    MODULE_NAMES, NUM_MODULES,
};
use super::module::SwerveModule;
use super::profile::{TrapezoidalConstraint, VelocityShaper};
use crate::config::DriveConfig;
use crate::geometry::{ChassisSpeeds, Pose};

/// What an external path follower needs from the drive base
pub trait HolonomicBase {
    /// Current best-estimate field pose
    fn pose(&self) -> Pose;

    /// Measured velocity in the chassis frame
    fn robot_relative_speeds(&self) -> ChassisSpeeds;

    /// Declare a new known pose, e.g. the start of an autonomous routine
    fn reset_pose(&mut self, pose: Pose);

    /// Drive with an already-profiled chassis-frame velocity
    fn drive_robot_relative(&mut self, speeds: ChassisSpeeds);

    /// Whether paths should be mirrored to the other side of the field
    fn should_mirror(&self) -> bool;
}

pub struct Chassis<H, G> {
    modules: [SwerveModule<H>; NUM_MODULES],
    gyro: G,
    kinematics: SwerveKinematics,
    estimator: PoseEstimator,
    vx_shaper: VelocityShaper,
    vy_shaper: VelocityShaper,
    omega_shaper: VelocityShaper,
    corrections: VecDeque<PoseCorrection>,
    dt: f64,
    max_module_speed: f64,
    stillness_threshold: f64,
    mirror_paths: bool,
    recalibrations: u64,
}

impl<H: ModuleHardware, G: HeadingSensor> Chassis<H, G> {
    /// Build the chassis around one hardware handle per module (in [`MODULE_NAMES`] order)
    pub fn new(
        config: &DriveConfig,
        hardware: [H; NUM_MODULES],
        mut gyro: G,
    ) -> Result<Self, KinematicsError> {
        let kinematics = SwerveKinematics::new(config.module_positions)?;

        gyro.reset();

        let drive_constraint =
            TrapezoidalConstraint::new(config.max_module_speed, config.max_module_acceleration);
        let mut index = 0;
        let modules = hardware.map(|hw| {
            let module = SwerveModule::new(
                MODULE_NAMES[index],
                hw,
                config.mounting_offsets[index],
                drive_constraint,
                config.steering_gains,
            );
            index += 1;
            module
        });

        let positions = modules.each_ref().map(|m| m.position());
        let estimator = PoseEstimator::new(
            kinematics.clone(),
            gyro.read_heading(),
            positions,
            config.initial_pose,
            config.pose_retention,
            config.correction_trust,
        );

        let linear = TrapezoidalConstraint::new(config.max_speed, config.max_acceleration);
        let angular =
            TrapezoidalConstraint::new(config.max_angular_speed, config.max_angular_acceleration);

        info!(
            dt = config.dt,
            max_module_speed = config.max_module_speed,
            "chassis initialised"
        );

        Ok(Self {
            modules,
            gyro,
            kinematics,
            estimator,
            vx_shaper: VelocityShaper::new(linear),
            vy_shaper: VelocityShaper::new(linear),
            omega_shaper: VelocityShaper::new(angular),
            corrections: VecDeque::new(),
            dt: config.dt,
            max_module_speed: config.max_module_speed,
            stillness_threshold: config.stillness_threshold,
            mirror_paths: config.mirror_paths,
            recalibrations: 0,
        })
    }

    /// Driver command: shaped, optionally field relative
    ///
    /// * `vx` - forward m/s (field +x when `field_relative`)
    /// * `vy` - left m/s (field +y when `field_relative`)
    /// * `omega` - counter-clockwise rad/s
    pub fn drive(&mut self, vx: f64, vy: f64, omega: f64, field_relative: bool) {
        let vx = self.vx_shaper.shape(vx, self.dt);
        let vy = self.vy_shaper.shape(vy, self.dt);
        let omega = self.omega_shaper.shape(omega, self.dt);

        let speeds = if field_relative {
            ChassisSpeeds::from_field_relative(vx, vy, omega, self.estimator.pose().heading)
        } else {
            ChassisSpeeds::new(vx, vy, omega)
        };
        self.set_chassis_speeds(speeds);
    }

    /// Path-follower command: chassis frame, already profiled
    pub fn drive_robot_relative(&mut self, speeds: ChassisSpeeds) {
        self.set_chassis_speeds(speeds);
    }

    fn set_chassis_speeds(&mut self, speeds: ChassisSpeeds) {
        let mut states = self.kinematics.to_module_states_discretized(speeds, self.dt);
        desaturate_wheel_speeds(&mut states, self.max_module_speed);

        for (module, state) in self.modules.iter_mut().zip(states) {
            module.set_desired_state(state, self.dt);
        }
    }

    /// Once per control period: calibration gate, odometry, queued corrections
    pub fn periodic(&mut self, timestamp: f64) {
        let aggregate_speed: f64 = self.module_states().iter().map(|s| s.speed).sum();
        if aggregate_speed < self.stillness_threshold {
            trace!(aggregate_speed, "chassis still, recalibrating steering");
            for module in self.modules.iter_mut() {
                module.recalibrate();
            }
            self.recalibrations += 1;
        }

        let positions = self.module_positions();
        let heading = self.gyro.read_heading();
        self.estimator.update(timestamp, heading, positions);

        while let Some(correction) = self.corrections.pop_front() {
            self.estimator.add_correction(&correction);
        }
    }

    /// Buffer an absolute pose measurement for the next tick
    pub fn queue_correction(&mut self, correction: PoseCorrection) {
        self.corrections.push_back(correction);
    }

    pub fn pending_corrections(&self) -> usize {
        self.corrections.len()
    }

    pub fn pose(&self) -> Pose {
        self.estimator.pose()
    }

    /// Measured chassis-frame velocity
    pub fn chassis_speeds(&self) -> ChassisSpeeds {
        self.kinematics.to_chassis_speeds(&self.module_states())
    }

    pub fn module_states(&self) -> [ModuleState; NUM_MODULES] {
        self.modules.each_ref().map(|m| m.state())
    }

    pub fn module_positions(&self) -> [ModulePosition; NUM_MODULES] {
        self.modules.each_ref().map(|m| m.position())
    }

    pub fn reset_pose(&mut self, pose: Pose) {
        info!(x = pose.x, y = pose.y, heading = pose.heading, "resetting pose");
        let positions = self.module_positions();
        self.estimator
            .reset(self.gyro.read_heading(), positions, pose);
    }

    pub fn should_mirror(&self) -> bool {
        self.mirror_paths
    }

    /// Command every actuator to zero and drop shaping history
    pub fn stop(&mut self) {
        debug!("stopping all modules");
        self.vx_shaper.reset();
        self.vy_shaper.reset();
        self.omega_shaper.reset();
        for module in self.modules.iter_mut() {
            module.stop();
        }
    }

    /// Number of ticks on which the stillness gate fired
    pub fn recalibrations(&self) -> u64 {
        self.recalibrations
    }
}

impl<H: ModuleHardware, G: HeadingSensor> HolonomicBase for Chassis<H, G> {
    fn pose(&self) -> Pose {
        Chassis::pose(self)
    }

    fn robot_relative_speeds(&self) -> ChassisSpeeds {
        self.chassis_speeds()
    }

    fn reset_pose(&mut self, pose: Pose) {
        Chassis::reset_pose(self, pose)
    }

    fn drive_robot_relative(&mut self, speeds: ChassisSpeeds) {
        Chassis::drive_robot_relative(self, speeds)
    }

    fn should_mirror(&self) -> bool {
        Chassis::should_mirror(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::hardware::{MockHeadingSensor, MockModuleHardware};
    use crate::drive::sim::{SimBase, SimGyro, SimModule};
    use std::f64::consts::FRAC_PI_2;

    fn sim_chassis(config: &DriveConfig) -> (SimBase, Chassis<SimModule, SimGyro>) {
        let kinematics = SwerveKinematics::new(config.module_positions).unwrap();
        let base = SimBase::new(kinematics, config.mounting_offsets, config.dt);
        let chassis = Chassis::new(config, base.modules(), base.gyro()).unwrap();
        (base, chassis)
    }

    fn still_gyro() -> MockHeadingSensor {
        let mut gyro = MockHeadingSensor::new();
        gyro.expect_reset().times(1).return_const(());
        gyro.expect_read_heading().return_const(0.0);
        gyro
    }

    /// Module whose absolute sensor must be read `absolute_reads` times in total
    fn counting_module(speed: f64, absolute_reads: usize) -> MockModuleHardware {
        let mut hw = MockModuleHardware::new();
        hw.expect_read_drive_velocity().return_const(speed);
        hw.expect_read_drive_position().return_const(0.0);
        hw.expect_read_steering_angle().return_const(0.0);
        hw.expect_read_steering_absolute_angle()
            .times(absolute_reads)
            .return_const(0.0);
        hw
    }

    #[test]
    fn test_one_tick_from_rest_is_shaped() {
        let config = DriveConfig {
            max_acceleration: 2.0,
            max_module_acceleration: 10.0,
            ..DriveConfig::default()
        };
        let (base, mut chassis) = sim_chassis(&config);

        chassis.drive(1.0, 0.0, 0.0, false);

        for i in 0..NUM_MODULES {
            let velocity = base.module(i).read_drive_velocity();
            assert!((velocity - 0.04).abs() < 1e-9, "module {} at {}", i, velocity);
        }
        assert!((chassis.chassis_speeds().vx - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_robot_relative_skips_shaping() {
        let config = DriveConfig {
            max_acceleration: 2.0,
            max_module_acceleration: 100.0,
            ..DriveConfig::default()
        };
        let (base, mut chassis) = sim_chassis(&config);

        chassis.drive_robot_relative(ChassisSpeeds::new(1.0, 0.0, 0.0));
        assert!((base.module(0).read_drive_velocity() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_wheel_speeds_desaturated() {
        let config = DriveConfig {
            max_module_acceleration: 1000.0,
            ..DriveConfig::default()
        };
        let (base, mut chassis) = sim_chassis(&config);

        chassis.drive_robot_relative(ChassisSpeeds::new(10.0, 0.0, 0.0));
        for i in 0..NUM_MODULES {
            assert!((base.module(i).read_drive_velocity() - config.max_module_speed).abs() < 1e-9);
        }
    }

    #[test]
    fn test_still_chassis_recalibrates_every_module_once() {
        let config = DriveConfig::default();
        // One read at construction, one from this tick's recalibration
        let hardware = [
            counting_module(0.0002, 2),
            counting_module(0.0001, 2),
            counting_module(0.0001, 2),
            counting_module(0.0001, 2),
        ];
        let mut chassis = Chassis::new(&config, hardware, still_gyro()).unwrap();

        chassis.periodic(0.02);
        assert_eq!(chassis.recalibrations(), 1);
    }

    #[test]
    fn test_moving_chassis_does_not_recalibrate() {
        let config = DriveConfig::default();
        let hardware = [
            counting_module(0.5, 1),
            counting_module(0.5, 1),
            counting_module(0.5, 1),
            counting_module(0.5, 1),
        ];
        let mut chassis = Chassis::new(&config, hardware, still_gyro()).unwrap();

        chassis.periodic(0.02);
        assert_eq!(chassis.recalibrations(), 0);
    }

    #[test]
    fn test_opposed_speeds_count_as_still() {
        // Signed sum cancels to zero although every wheel is turning
        let config = DriveConfig::default();
        let hardware = [
            counting_module(1.0, 2),
            counting_module(-1.0, 2),
            counting_module(1.0, 2),
            counting_module(-1.0, 2),
        ];
        let mut chassis = Chassis::new(&config, hardware, still_gyro()).unwrap();

        chassis.periodic(0.02);
        assert_eq!(chassis.recalibrations(), 1);
    }

    #[test]
    fn test_reversing_chassis_passes_stillness_gate() {
        // Signed sum is -4 m/s, below the threshold, while driving backwards
        let config = DriveConfig::default();
        let hardware = [
            counting_module(-1.0, 2),
            counting_module(-1.0, 2),
            counting_module(-1.0, 2),
            counting_module(-1.0, 2),
        ];
        let mut chassis = Chassis::new(&config, hardware, still_gyro()).unwrap();

        chassis.periodic(0.02);
        assert_eq!(chassis.recalibrations(), 1);
    }

    #[test]
    fn test_field_relative_drive_uses_estimated_heading() {
        let config = DriveConfig::default();
        let (_base, mut chassis) = sim_chassis(&config);
        chassis.reset_pose(Pose::new(0.0, 0.0, FRAC_PI_2));

        let mut t = 0.0;
        for _ in 0..100 {
            t += config.dt;
            chassis.periodic(t);
            chassis.drive(0.0, 1.0, 0.0, true);
        }
        chassis.periodic(t + config.dt);

        let pose = chassis.pose();
        assert!(pose.y > 0.5, "pose {:?}", pose);
        assert!(pose.x.abs() < 1e-6, "pose {:?}", pose);
        assert!((pose.heading - FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn test_periodic_drains_corrections() {
        let config = DriveConfig {
            correction_trust: 0.5,
            ..DriveConfig::default()
        };
        let (_base, mut chassis) = sim_chassis(&config);
        chassis.periodic(0.02);

        chassis.queue_correction(PoseCorrection::new(Pose::new(1.0, 0.0, 0.0), 0.04));
        chassis.queue_correction(PoseCorrection::new(Pose::new(1.0, 0.0, 0.0), 0.04));
        assert_eq!(chassis.pending_corrections(), 2);

        chassis.periodic(0.04);
        assert_eq!(chassis.pending_corrections(), 0);
        assert!((chassis.pose().x - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_stop_zeroes_modules() {
        let config = DriveConfig::default();
        let (base, mut chassis) = sim_chassis(&config);
        for _ in 0..10 {
            chassis.drive(1.0, 0.0, 0.0, false);
        }
        assert!(base.module(0).read_drive_velocity() > 0.0);

        chassis.stop();
        for i in 0..NUM_MODULES {
            assert_eq!(base.module(i).read_drive_velocity(), 0.0);
        }
        // Shaping restarts from rest
        chassis.drive(1.0, 0.0, 0.0, false);
        assert!((base.module(0).read_drive_velocity() - 0.06).abs() < 1e-9);
    }

    #[test]
    fn test_holonomic_base_contract() {
        let config = DriveConfig {
            mirror_paths: true,
            ..DriveConfig::default()
        };
        let (_base, mut chassis) = sim_chassis(&config);

        fn follower_step(base: &mut impl HolonomicBase) -> (Pose, bool) {
            base.reset_pose(Pose::new(2.0, 3.0, 0.0));
            base.drive_robot_relative(ChassisSpeeds::new(0.5, 0.0, 0.0));
            (base.pose(), base.should_mirror())
        }

        let (pose, mirror) = follower_step(&mut chassis);
        assert_eq!((pose.x, pose.y), (2.0, 3.0));
        assert!(mirror);
        assert!(chassis.robot_relative_speeds().vx > 0.0);
    }
}
