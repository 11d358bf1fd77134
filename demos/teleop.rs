// Keyboard teleop: WASD translate, Z/X rotate, G toggle field relative, R/F speed, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use swerve_zenoh_runtime::config::TOPIC_CMD_BASE;
use swerve_zenoh_runtime::messages::BaseCommand;
use tracing::info;

const SPEEDS: [f64; 3] = [0.5, 1.5, 3.0]; // m/s
const TURN_RATES: [f64; 3] = [0.5, 1.5, 3.0]; // rad/s
const INPUT_TIMEOUT_MS: u64 = 100; // Release the sticks after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_BASE).await?;

    info!("Controls: WASD=move, Z/X=rotate, G=field relative, R/F=speed, Q=quit");
    print_speed(0);

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut cmd = BaseCommand::default();
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let mut moved = true;

                match code {
                    KeyCode::Char('w') if pressed => cmd.x_vel = SPEEDS[speed_idx],
                    KeyCode::Char('s') if pressed => cmd.x_vel = -SPEEDS[speed_idx],
                    KeyCode::Char('a') if pressed => cmd.y_vel = SPEEDS[speed_idx],
                    KeyCode::Char('d') if pressed => cmd.y_vel = -SPEEDS[speed_idx],
                    KeyCode::Char('z') if pressed => cmd.theta_vel = TURN_RATES[speed_idx],
                    KeyCode::Char('x') if pressed => cmd.theta_vel = -TURN_RATES[speed_idx],
                    KeyCode::Char('g') if kind == KeyEventKind::Press => {
                        cmd.field_relative = !cmd.field_relative;
                        info!("Field relative: {}", cmd.field_relative);
                        moved = false;
                    }
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                        moved = false;
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                        moved = false;
                    }
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,
                    _ => moved = false,
                }

                if moved {
                    last_movement_input = Instant::now();
                }
            }
        }

        // Release to zero if no movement input for INPUT_TIMEOUT_MS; the runtime shapes the ramp
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            cmd.x_vel = 0.0;
            cmd.y_vel = 0.0;
            cmd.theta_vel = 0.0;
        }

        // Always publish at ~50Hz
        publisher.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {} ({} m/s, {} rad/s)", label, SPEEDS[idx], TURN_RATES[idx]);
}
