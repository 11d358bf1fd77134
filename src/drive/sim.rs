// Simulated swerve hardware
//
// Ideal actuators: drive velocity follows its setpoint instantly, steering
// slews proportionally to the voltage fraction. The gyro integrates the yaw
// implied by the wheels, so the simulated base never slips. Used by the
// runtime when no drivers are attached and by the tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::hardware::{HeadingSensor, ModuleHardware};
use super::kinematics::{ModulePosition, SwerveKinematics, NUM_MODULES};
use crate::geometry::wrap_angle;

/// Steering slew rate at full voltage, rad/s
pub const SIM_STEER_RATE: f64 = 4.0 * std::f64::consts::PI;

#[derive(Debug, Clone, Copy, Default)]
struct SimModuleState {
    velocity: f64,
    /// Resettable drive position
    position: f64,
    /// Total travel, never reset (feeds the gyro)
    odometer: f64,
    wheel_angle: f64,
    /// Wheel angle at which the relative steering encoder reads zero
    encoder_zero: f64,
    mounting_offset: f64,
}

#[derive(Debug)]
struct SimWorld {
    modules: [SimModuleState; NUM_MODULES],
    kinematics: SwerveKinematics,
    dt: f64,
    yaw: f64,
    yaw_zero: f64,
    last_travel: [ModulePosition; NUM_MODULES],
}

impl SimWorld {
    fn travel(&self) -> [ModulePosition; NUM_MODULES] {
        self.modules
            .map(|m| ModulePosition::new(m.odometer, m.wheel_angle))
    }

    fn integrate_yaw(&mut self) {
        let travel = self.travel();
        self.yaw += self.kinematics.to_twist(&self.last_travel, &travel).dtheta;
        self.last_travel = travel;
    }
}

/// Shared simulated base; hands out the module and gyro handles
#[derive(Debug, Clone)]
pub struct SimBase {
    world: Arc<Mutex<SimWorld>>,
}

impl SimBase {
    /// `dt` is the tick length each actuator command is held for
    pub fn new(kinematics: SwerveKinematics, mounting_offsets: [f64; NUM_MODULES], dt: f64) -> Self {
        let modules = mounting_offsets.map(|mounting_offset| SimModuleState {
            mounting_offset,
            ..SimModuleState::default()
        });
        let world = SimWorld {
            modules,
            kinematics,
            dt,
            yaw: 0.0,
            yaw_zero: 0.0,
            last_travel: [ModulePosition::default(); NUM_MODULES],
        };
        Self {
            world: Arc::new(Mutex::new(world)),
        }
    }

    /// Start the wheels at the given angles; relative encoders read zero there
    pub fn with_wheel_angles(self, angles: [f64; NUM_MODULES]) -> Self {
        {
            let mut world = self.lock();
            for (module, angle) in world.modules.iter_mut().zip(angles) {
                module.wheel_angle = angle;
                module.encoder_zero = angle;
            }
            world.last_travel = world.travel();
        }
        self
    }

    pub fn module(&self, index: usize) -> SimModule {
        SimModule {
            world: Arc::clone(&self.world),
            index,
        }
    }

    pub fn modules(&self) -> [SimModule; NUM_MODULES] {
        std::array::from_fn(|i| self.module(i))
    }

    pub fn gyro(&self) -> SimGyro {
        SimGyro {
            world: Arc::clone(&self.world),
        }
    }

    /// Shift a relative steering encoder as if the belt skipped
    pub fn inject_steering_slip(&self, index: usize, slip: f64) {
        debug!(module = index, slip, "sim: injecting steering slip");
        self.lock().modules[index].encoder_zero += slip;
    }

    /// Physical wheel angle, wrapped
    pub fn wheel_angle(&self, index: usize) -> f64 {
        wrap_angle(self.lock().modules[index].wheel_angle)
    }

    fn lock(&self) -> MutexGuard<'_, SimWorld> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One simulated swerve module
#[derive(Debug)]
pub struct SimModule {
    world: Arc<Mutex<SimWorld>>,
    index: usize,
}

impl SimModule {
    fn read<T>(&self, f: impl FnOnce(&SimModuleState) -> T) -> T {
        let world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        f(&world.modules[self.index])
    }

    fn write(&mut self, f: impl FnOnce(&mut SimModuleState, f64)) {
        let mut world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        let dt = world.dt;
        f(&mut world.modules[self.index], dt)
    }
}

impl ModuleHardware for SimModule {
    fn read_drive_velocity(&self) -> f64 {
        self.read(|m| m.velocity)
    }

    fn read_drive_position(&self) -> f64 {
        self.read(|m| m.position)
    }

    fn read_steering_angle(&self) -> f64 {
        self.read(|m| m.wheel_angle - m.encoder_zero)
    }

    fn read_steering_absolute_angle(&self) -> f64 {
        self.read(|m| wrap_angle(m.wheel_angle + m.mounting_offset))
    }

    fn set_drive_velocity(&mut self, velocity: f64) {
        self.write(|m, dt| {
            m.velocity = velocity;
            m.position += velocity * dt;
            m.odometer += velocity * dt;
        });
    }

    fn set_steering_voltage(&mut self, fraction: f64) {
        self.write(|m, dt| {
            m.wheel_angle += fraction.clamp(-1.0, 1.0) * SIM_STEER_RATE * dt;
        });
    }

    fn reset_drive_position(&mut self) {
        self.write(|m, _| m.position = 0.0);
    }
}

/// Gyro for the simulated base
#[derive(Debug)]
pub struct SimGyro {
    world: Arc<Mutex<SimWorld>>,
}

impl HeadingSensor for SimGyro {
    fn read_heading(&self) -> f64 {
        let mut world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        world.integrate_yaw();
        world.yaw - world.yaw_zero
    }

    fn reset(&mut self) {
        let mut world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        world.integrate_yaw();
        world.yaw_zero = world.yaw;
    }
}
