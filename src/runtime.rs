// 50 Hz loop with watchdog
// Note: a watchdog is a safety mechanism that triggers a safe action if something goes wrong
// Eg. without it if teleop crashes and stops sending commands, the base would keep driving on the last command

use std::ops::{Deref, DerefMut};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use tokio::time::interval;
use tracing::{info, warn};

// local imports
use crate::config::{
    DriveConfig, CMD_TIMEOUT, LOOP_HZ, TOPIC_CMD_BASE, TOPIC_CMD_FOLLOW, TOPIC_CMD_RESET_POSE,
    TOPIC_HEALTH, TOPIC_POSE_CORRECTION, TOPIC_STATE,
};
use crate::drive::{Chassis, HeadingSensor, ModuleHardware, PoseCorrection, SimBase, SwerveKinematics};
use crate::geometry::{ChassisSpeeds, Pose};
use crate::messages::{
    BaseCommand, ChassisState, FollowCommand, PoseMeasurement, ResetPose, RuntimeHealth,
};

/// The most recent command, from whichever source sent it last
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActiveCommand {
    Teleop(BaseCommand),
    Follow(ChassisSpeeds),
}

pub struct Runtime<H, G> {
    chassis: Chassis<H, G>,
    latest_cmd: Option<ActiveCommand>,
    cmd_received_at: f64,
    health: RuntimeHealth,
}

impl<H: ModuleHardware, G: HeadingSensor> Runtime<H, G> {
    pub fn new(chassis: Chassis<H, G>) -> Self {
        Self {
            chassis,
            latest_cmd: None,
            cmd_received_at: f64::NEG_INFINITY,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    /// Process incoming command received at `now` (seconds)
    pub fn on_command(&mut self, cmd: ActiveCommand, now: f64) {
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = now;
    }

    pub fn on_pose_measurement(&mut self, measurement: &PoseMeasurement) {
        self.chassis.queue_correction(PoseCorrection::from(measurement));
    }

    pub fn on_reset_pose(&mut self, pose: Pose) {
        self.chassis.reset_pose(pose);
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn chassis(&self) -> &Chassis<H, G> {
        &self.chassis
    }

    /// One control period: odometry and corrections, then actuation (includes watchdog logic)
    pub fn step(&mut self, now: f64) -> ChassisState {
        self.chassis.periodic(now);

        let cmd_age = now - self.cmd_received_at;
        match self.latest_cmd {
            Some(cmd) if cmd_age <= CMD_TIMEOUT.as_secs_f64() => {
                self.health = RuntimeHealth::Ok;
                match cmd {
                    ActiveCommand::Teleop(cmd) => self.chassis.drive(
                        cmd.x_vel,
                        cmd.y_vel,
                        cmd.theta_vel,
                        cmd.field_relative,
                    ),
                    ActiveCommand::Follow(speeds) => self.chassis.drive_robot_relative(speeds),
                }
            }
            _ => {
                // Watchdog triggered (or no command ever received) - ramp the base to rest
                if self.health != RuntimeHealth::CmdStale {
                    warn!("Command stale ({:.3}s old), stopping base", cmd_age);
                }
                self.health = RuntimeHealth::CmdStale;
                self.chassis.drive(0.0, 0.0, 0.0, false);
            }
        }

        ChassisState {
            pose: self.chassis.pose(),
            speeds: self.chassis.chassis_speeds(),
            mirror_paths: self.chassis.should_mirror(),
        }
    }

    /// Zero every actuator (shutdown path)
    pub fn stop(&mut self) {
        self.chassis.stop();
    }
}

/// Owns the runtime for the control loop and zeroes every actuator when dropped,
/// whether the loop ended on Ctrl-C, a transport error or a panic
pub struct StopOnDrop<H: ModuleHardware, G: HeadingSensor> {
    runtime: Runtime<H, G>,
}

impl<H: ModuleHardware, G: HeadingSensor> StopOnDrop<H, G> {
    pub fn new(runtime: Runtime<H, G>) -> Self {
        Self { runtime }
    }
}

impl<H: ModuleHardware, G: HeadingSensor> Deref for StopOnDrop<H, G> {
    type Target = Runtime<H, G>;

    fn deref(&self) -> &Self::Target {
        &self.runtime
    }
}

impl<H: ModuleHardware, G: HeadingSensor> DerefMut for StopOnDrop<H, G> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.runtime
    }
}

impl<H: ModuleHardware, G: HeadingSensor> Drop for StopOnDrop<H, G> {
    fn drop(&mut self) {
        info!("Control loop exited, zeroing actuators");
        self.runtime.stop();
    }
}

/// Seconds since the UNIX epoch; pose sources stamp their measurements on the same clock
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn parse<T: DeserializeOwned>(topic: &str, payload: &[u8]) -> Option<T> {
    match serde_json::from_slice::<T>(payload) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("Failed to parse message on {}: {}", topic, e);
            None
        }
    }
}

pub async fn run(config: DriveConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Building simulated swerve base...");
    let kinematics = SwerveKinematics::new(config.module_positions)?;
    let base = SimBase::new(kinematics, config.mounting_offsets, config.dt);
    let chassis = Chassis::new(&config, base.modules(), base.gyro())?;
    let mut runtime = StopOnDrop::new(Runtime::new(chassis));

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_base = session.declare_subscriber(TOPIC_CMD_BASE).await?;
    let sub_follow = session.declare_subscriber(TOPIC_CMD_FOLLOW).await?;
    let sub_reset = session.declare_subscriber(TOPIC_CMD_RESET_POSE).await?;
    let sub_pose = session.declare_subscriber(TOPIC_POSE_CORRECTION).await?;
    let pub_state = session.declare_publisher(TOPIC_STATE).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!(
        "Subscribed to: {}, {}, {}, {}",
        TOPIC_CMD_BASE, TOPIC_CMD_FOLLOW, TOPIC_CMD_RESET_POSE, TOPIC_POSE_CORRECTION
    );
    info!("Publishing to: {}, {}", TOPIC_STATE, TOPIC_HEALTH);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return Ok(());
            }
        }
        let now = now_seconds();

        // 1. Drain everything pending (non-blocking)
        while let Ok(Some(sample)) = sub_reset.try_recv() {
            if let Some(reset) = parse::<ResetPose>(TOPIC_CMD_RESET_POSE, &sample.payload().to_bytes()) {
                runtime.on_reset_pose(Pose::from(&reset));
            }
        }
        while let Ok(Some(sample)) = sub_base.try_recv() {
            if let Some(cmd) = parse::<BaseCommand>(TOPIC_CMD_BASE, &sample.payload().to_bytes()) {
                runtime.on_command(ActiveCommand::Teleop(cmd), now);
            }
        }
        while let Ok(Some(sample)) = sub_follow.try_recv() {
            if let Some(cmd) = parse::<FollowCommand>(TOPIC_CMD_FOLLOW, &sample.payload().to_bytes()) {
                runtime.on_command(ActiveCommand::Follow(ChassisSpeeds::from(&cmd)), now);
            }
        }
        while let Ok(Some(sample)) = sub_pose.try_recv() {
            if let Some(m) = parse::<PoseMeasurement>(TOPIC_POSE_CORRECTION, &sample.payload().to_bytes()) {
                runtime.on_pose_measurement(&m);
            }
        }

        // 2. Tick the chassis (includes watchdog logic)
        let state = runtime.step(now);

        // 3. Publish state
        let state_json = serde_json::to_string(&state)?;
        pub_state.put(state_json).await?;

        // 4. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        pub_health.put(health_json).await?;
    }
}
