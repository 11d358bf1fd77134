// Swerve inverse/forward kinematics for the four-module base
// Converts chassis velocities to per-module (speed, angle) pairs and back.

use nalgebra::{SMatrix, SVector, Vector3};

use crate::geometry::{wrap_angle, ChassisSpeeds, Translation, Twist};

/// Number of swerve modules on the base
pub const NUM_MODULES: usize = 4;

/// Two rows (x and y) per module in the kinematic matrices
const MATRIX_ROWS: usize = 2 * NUM_MODULES;

/// Module order used everywhere in the drive stack
pub const MODULE_NAMES: [&str; NUM_MODULES] = ["front_left", "rear_left", "rear_right", "front_right"];

/// Velocity of one module: signed drive speed (m/s) and wheel angle (rad)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModuleState {
    pub speed: f64,
    pub angle: f64,
}

impl ModuleState {
    pub const fn new(speed: f64, angle: f64) -> Self {
        Self { speed, angle }
    }

    /// Swap to the equivalent opposite-facing target when it is closer.
    ///
    /// If the target angle is more than pi/2 away from `current_angle`, the
    /// wheel is turned to `angle + pi` and driven backwards instead, so
    /// steering never travels further than a quarter turn.
    pub fn optimize(&self, current_angle: f64) -> ModuleState {
        let delta = wrap_angle(self.angle - current_angle);
        if delta.abs() > std::f64::consts::FRAC_PI_2 {
            ModuleState::new(-self.speed, wrap_angle(self.angle + std::f64::consts::PI))
        } else {
            ModuleState::new(self.speed, wrap_angle(self.angle))
        }
    }
}

/// Cumulative travel of one module: drive distance (m) and wheel angle (rad)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModulePosition {
    pub distance: f64,
    pub angle: f64,
}

impl ModulePosition {
    pub const fn new(distance: f64, angle: f64) -> Self {
        Self { distance, angle }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KinematicsError {
    #[error("Module geometry is degenerate: modules must not all sit on one point")]
    DegenerateGeometry,
}

/// Kinematics for a fixed module layout
///
/// Each module contributes two rows to the forward matrix:
/// `[1, 0, -y]` and `[0, 1, x]`, mapping `[vx, vy, omega]` to that module's
/// velocity vector. The inverse is the least-squares pseudo-inverse.
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    forward: SMatrix<f64, MATRIX_ROWS, 3>,
    inverse: SMatrix<f64, 3, MATRIX_ROWS>,
}

impl SwerveKinematics {
    /// Build kinematics for modules mounted at `module_positions` (chassis frame, meters)
    pub fn new(module_positions: [Translation; NUM_MODULES]) -> Result<Self, KinematicsError> {
        let mut forward = SMatrix::<f64, MATRIX_ROWS, 3>::zeros();
        for (i, position) in module_positions.iter().enumerate() {
            forward[(2 * i, 0)] = 1.0;
            forward[(2 * i, 2)] = -position.y;
            forward[(2 * i + 1, 1)] = 1.0;
            forward[(2 * i + 1, 2)] = position.x;
        }

        let transpose = forward.transpose();
        let normal = transpose * forward;
        if normal.determinant().abs() < 1e-12 {
            return Err(KinematicsError::DegenerateGeometry);
        }
        let normal_inverse = normal
            .try_inverse()
            .ok_or(KinematicsError::DegenerateGeometry)?;

        Ok(Self {
            forward,
            inverse: normal_inverse * transpose,
        })
    }

    /// Chassis velocity -> module states, without discretization
    pub fn to_module_states(&self, speeds: ChassisSpeeds) -> [ModuleState; NUM_MODULES] {
        let vectors = self.forward * Vector3::new(speeds.vx, speeds.vy, speeds.omega);

        std::array::from_fn(|i| {
            let vx = vectors[2 * i];
            let vy = vectors[2 * i + 1];
            ModuleState::new(vx.hypot(vy), wrap_angle(vy.atan2(vx)))
        })
    }

    /// Chassis velocity -> module states, compensating for rotation during one tick of `dt`
    pub fn to_module_states_discretized(
        &self,
        speeds: ChassisSpeeds,
        dt: f64,
    ) -> [ModuleState; NUM_MODULES] {
        self.to_module_states(speeds.discretize(dt))
    }

    /// Module states -> chassis velocity (least squares over all modules)
    pub fn to_chassis_speeds(&self, states: &[ModuleState; NUM_MODULES]) -> ChassisSpeeds {
        let vectors = SVector::<f64, MATRIX_ROWS>::from_fn(|row, _| {
            let state = &states[row / 2];
            if row % 2 == 0 {
                state.speed * state.angle.cos()
            } else {
                state.speed * state.angle.sin()
            }
        });
        let chassis = self.inverse * vectors;
        ChassisSpeeds::new(chassis[0], chassis[1], chassis[2])
    }

    /// Chassis displacement between two sets of module positions
    ///
    /// Each module is assumed to have travelled its distance delta along its
    /// latest wheel angle.
    pub fn to_twist(
        &self,
        start: &[ModulePosition; NUM_MODULES],
        end: &[ModulePosition; NUM_MODULES],
    ) -> Twist {
        let deltas = SVector::<f64, MATRIX_ROWS>::from_fn(|row, _| {
            let module = row / 2;
            let distance = end[module].distance - start[module].distance;
            if row % 2 == 0 {
                distance * end[module].angle.cos()
            } else {
                distance * end[module].angle.sin()
            }
        });
        let chassis = self.inverse * deltas;
        Twist::new(chassis[0], chassis[1], chassis[2])
    }
}

/// Scale every module down uniformly so none exceeds `max_speed`
///
/// Clamping modules independently would bend the commanded path; uniform
/// scaling keeps the ratio between every pair of modules.
pub fn desaturate_wheel_speeds(states: &mut [ModuleState; NUM_MODULES], max_speed: f64) {
    let fastest = states.iter().map(|s| s.speed.abs()).fold(0.0f64, f64::max);
    if fastest > max_speed && fastest > 0.0 {
        let scale = max_speed / fastest;
        for state in states.iter_mut() {
            state.speed *= scale;
        }
    }
}
