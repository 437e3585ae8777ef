//! # Horizon Session Simulator
//!
//! Headless driver for `horizon_zones`: every simulated participant gets its
//! own zone-system replica, all joined to one in-memory session. Agents wander
//! a square world and tend to gather, which exercises fixed-zone membership,
//! proximity pairing, pooled-zone release and authority handling together.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (creates horizon-sim.toml if missing)
//! horizon-sim
//!
//! # Bigger crowd, two minutes, JSON report on stdout
//! horizon-sim --users 24 --bots 4 --duration 120 --stats-json
//!
//! # Run until Ctrl+C with verbose logs
//! horizon-sim --duration 0 --log-level debug
//! ```

use tracing::error;

pub mod agent;
pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

pub use app::{Application, SessionReport, SessionStats, Simulation};
pub use cli::CliArgs;
pub use config::{AppConfig, LoggingSettings, SessionSettings};

/// Parses the CLI, sets up logging and runs the simulator to completion.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging settings come from the file before anything else runs.
    let mut logging = AppConfig::load_from_file(&args.config_path)
        .await
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Simulation error: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start simulator: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}
