// Timeouts, topics, drive configuration
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drive::kinematics::NUM_MODULES;
use crate::drive::pid::PidGains;
use crate::geometry::{Pose, Translation};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_BASE: &str = "swerve/cmd/base"; // teleop commands (shaped)
pub const TOPIC_CMD_FOLLOW: &str = "swerve/cmd/follow"; // path follower, robot relative
pub const TOPIC_CMD_RESET_POSE: &str = "swerve/cmd/reset_pose"; // known starting pose
pub const TOPIC_POSE_CORRECTION: &str = "swerve/sensor/pose"; // absolute pose estimates
pub const TOPIC_STATE: &str = "swerve/state/pose"; // pose + chassis speeds
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Drive base configuration
///
/// Any field missing from a config file takes its value from [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Control period, seconds
    pub dt: f64,

    /// Module mounting positions in the chassis frame (front_left, rear_left,
    /// rear_right, front_right), meters
    pub module_positions: [Translation; NUM_MODULES],

    /// Absolute steering sensor reading with the wheel pointing forward, rad
    pub mounting_offsets: [f64; NUM_MODULES],

    /// Chassis command shaping: linear (m/s, m/s^2) and angular (rad/s, rad/s^2)
    pub max_speed: f64,
    pub max_acceleration: f64,
    pub max_angular_speed: f64,
    pub max_angular_acceleration: f64,

    /// Module drive limits, m/s and m/s^2
    pub max_module_speed: f64,
    pub max_module_acceleration: f64,

    pub steering_gains: PidGains,

    /// Signed sum of module speeds below which steering sensors recalibrate, m/s
    pub stillness_threshold: f64,

    /// Longest correction latency that can still be replayed, seconds
    pub pose_retention: f64,

    /// Default weight of an absolute pose correction against odometry
    pub correction_trust: f64,

    pub initial_pose: Pose,

    /// Whether the path follower should mirror its paths (far alliance side)
    pub mirror_paths: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        let half = 0.3;
        Self {
            dt: 1.0 / LOOP_HZ as f64,
            module_positions: [
                Translation::new(half, half),
                Translation::new(-half, half),
                Translation::new(-half, -half),
                Translation::new(half, -half),
            ],
            mounting_offsets: [0.0; NUM_MODULES],
            max_speed: 4.5,
            max_acceleration: 3.0,
            max_angular_speed: 2.0 * std::f64::consts::PI,
            max_angular_acceleration: 4.0 * std::f64::consts::PI,
            max_module_speed: 4.5,
            max_module_acceleration: 8.0,
            steering_gains: PidGains {
                kp: 1.0,
                ki: 0.0,
                kd: 0.0,
            },
            stillness_threshold: 0.01,
            pose_retention: 1.5,
            correction_trust: 0.2,
            initial_pose: Pose::default(),
            mirror_paths: false,
        }
    }
}

impl DriveConfig {
    /// Load a JSON config file and validate it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: DriveConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("dt", self.dt),
            ("max_speed", self.max_speed),
            ("max_acceleration", self.max_acceleration),
            ("max_angular_speed", self.max_angular_speed),
            ("max_angular_acceleration", self.max_angular_acceleration),
            ("max_module_speed", self.max_module_speed),
            ("max_module_acceleration", self.max_module_acceleration),
            ("pose_retention", self.pose_retention),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if !(self.correction_trust > 0.0 && self.correction_trust <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "correction_trust must be in (0, 1], got {}",
                self.correction_trust
            )));
        }
        if !self.stillness_threshold.is_finite() {
            return Err(ConfigError::Invalid(
                "stillness_threshold must be finite".to_string(),
            ));
        }
        Ok(())
    }
}
