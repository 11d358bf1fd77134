// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::drive::PoseCorrection;
use crate::geometry::{ChassisSpeeds, Pose};

// Command from teleop/scripts -> runtime (shaped before it reaches the modules)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseCommand {
    pub x_vel: f64,     // m/s
    pub y_vel: f64,     // m/s
    pub theta_vel: f64, // rad/s, counter-clockwise
    #[serde(default)]
    pub field_relative: bool,
}

// Command from the path follower -> runtime; robot relative and already profiled
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowCommand {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
}

impl From<&FollowCommand> for ChassisSpeeds {
    fn from(cmd: &FollowCommand) -> Self {
        ChassisSpeeds::new(cmd.vx, cmd.vy, cmd.omega)
    }
}

// Absolute pose estimate from a vision pipeline (or any other absolute source)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseMeasurement {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub timestamp: f64, // seconds since UNIX epoch, when the image was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<f64>,
}

impl From<&PoseMeasurement> for PoseCorrection {
    fn from(m: &PoseMeasurement) -> Self {
        PoseCorrection {
            pose: Pose::new(m.x, m.y, m.heading).with_timestamp(m.timestamp),
            timestamp: m.timestamp,
            trust: m.trust,
        }
    }
}

// Known pose announced by a planner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResetPose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl From<&ResetPose> for Pose {
    fn from(reset: &ResetPose) -> Self {
        Pose::new(reset.x, reset.y, reset.heading)
    }
}

// State published every tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChassisState {
    pub pose: Pose,
    pub speeds: ChassisSpeeds, // robot relative, measured
    pub mirror_paths: bool,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}
