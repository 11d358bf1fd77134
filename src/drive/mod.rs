// Swerve drive stack for the four-module base
//
// Provides:
// - Swerve kinematics (chassis velocity <-> module states, odometry twists)
// - Trapezoidal velocity shaping and a continuous-input PID
// - Per-module control with steering self-calibration
// - Pose estimation with latency-compensated absolute corrections
// - The chassis controller tying it together, plus a simulated backend

pub mod chassis;
pub mod estimator;
pub mod hardware;
pub mod kinematics;
pub mod module;
pub mod pid;
pub mod profile;
pub mod sim;

pub use chassis::{Chassis, HolonomicBase};
pub use estimator::{PoseCorrection, PoseEstimator};
pub use hardware::{HeadingSensor, ModuleHardware};
pub use kinematics::{
    desaturate_wheel_speeds, KinematicsError, ModulePosition, ModuleState, SwerveKinematics,
    NUM_MODULES,
};
pub use module::SwerveModule;
pub use sim::{SimBase, SimGyro, SimModule};
