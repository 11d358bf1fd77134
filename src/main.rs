use std::path::PathBuf;

use clap::Parser;
use swerve_zenoh_runtime::config::DriveConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Swerve base runtime: teleop/follower commands in, pose and health out
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON drive configuration; built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            info!("Loading drive config from {}", path.display());
            match DriveConfig::load(path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Config error: {}", e);
                    std::process::exit(2);
                }
            }
        }
        None => DriveConfig::default(),
    };

    if let Err(e) = swerve_zenoh_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
