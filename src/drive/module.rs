// Per-module controller: angle optimization, drive shaping, steering PID,
// and steering-sensor self-calibration.

use tracing::{debug, trace};

use super::hardware::ModuleHardware;
use super::kinematics::{ModulePosition, ModuleState};
use super::pid::{PidController, PidGains};
use super::profile::{TrapezoidalConstraint, VelocityShaper};
use crate::geometry::wrap_angle;

/// Below this requested speed (m/s) the wheel holds its current angle
pub const MIN_STEER_SPEED: f64 = 1e-3;

/// Controller for one swerve module
pub struct SwerveModule<H> {
    name: &'static str,
    hardware: H,
    /// Absolute sensor reading when the wheel points forward
    mounting_offset: f64,
    /// Added to the relative steering encoder to get the wheel angle
    calibration_offset: f64,
    drive_shaper: VelocityShaper,
    steering_pid: PidController,
}

impl<H: ModuleHardware> SwerveModule<H> {
    pub fn new(
        name: &'static str,
        hardware: H,
        mounting_offset: f64,
        drive_constraint: TrapezoidalConstraint,
        steering_gains: PidGains,
    ) -> Self {
        let mut module = Self {
            name,
            hardware,
            mounting_offset,
            calibration_offset: 0.0,
            drive_shaper: VelocityShaper::new(drive_constraint),
            steering_pid: PidController::new(steering_gains).with_continuous_input(),
        };
        module.recalibrate();
        module
    }

    /// Calibrated wheel angle, wrapped to (-pi, pi]
    pub fn angle(&self) -> f64 {
        wrap_angle(self.hardware.read_steering_angle() + self.calibration_offset)
    }

    /// Current drive speed and wheel angle
    pub fn state(&self) -> ModuleState {
        ModuleState::new(self.hardware.read_drive_velocity(), self.angle())
    }

    /// Cumulative drive distance and wheel angle
    pub fn position(&self) -> ModulePosition {
        ModulePosition::new(self.hardware.read_drive_position(), self.angle())
    }

    /// Command the module towards `desired` for one tick of length `dt`
    pub fn set_desired_state(&mut self, desired: ModuleState, dt: f64) {
        let current = self.angle();

        // A zero vector has no meaningful direction; keep the wheel where it is
        let desired = if desired.speed.abs() < MIN_STEER_SPEED {
            ModuleState::new(desired.speed, current)
        } else {
            desired
        };
        let target = desired.optimize(current);

        let drive = self.drive_shaper.shape(target.speed, dt);
        let steer = self
            .steering_pid
            .calculate(current, target.angle, dt)
            .clamp(-1.0, 1.0);

        trace!(
            module = self.name,
            drive,
            steer,
            target_angle = target.angle,
            current_angle = current,
            "module setpoint"
        );

        self.hardware.set_drive_velocity(drive);
        self.hardware.set_steering_voltage(steer);
    }

    /// Steering error of the last setpoint, rad
    pub fn steering_error(&self) -> f64 {
        self.steering_pid.last_error()
    }

    /// Re-derive the steering offset from the absolute sensor.
    ///
    /// Only valid while the chassis is still; a reading taken while the
    /// wheel is being driven would bake a transient into the offset.
    pub fn recalibrate(&mut self) {
        let absolute = self.hardware.read_steering_absolute_angle() - self.mounting_offset;
        let offset = wrap_angle(absolute - self.hardware.read_steering_angle());
        if (offset - self.calibration_offset).abs() > 1e-6 {
            debug!(
                module = self.name,
                old = self.calibration_offset,
                new = offset,
                "steering offset updated"
            );
        }
        self.calibration_offset = offset;
    }

    /// Zero the drive distance
    pub fn reset_encoders(&mut self) {
        self.hardware.reset_drive_position();
    }

    /// Zero both actuators and forget shaping history
    pub fn stop(&mut self) {
        self.drive_shaper.reset();
        self.steering_pid.reset();
        self.hardware.set_drive_velocity(0.0);
        self.hardware.set_steering_voltage(0.0);
    }
}
