//! ridecast - hourly station demand pipeline
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin ridecast -- <features|train|predict|forecast|all> [--config path]
//! ```
//!
//! ## Environment Variables
//!
//! - RIDECAST_CONFIG - JSON configuration file (used when --config is absent)
//! - RIDECAST_INPUT_DIR / RIDECAST_OUTPUT_DIR / RIDECAST_CATALOG_DIR - directory overrides
//! - RIDECAST_LAGS, RIDECAST_WINDOWS - feature settings (e.g. 28 and 6,12,24)
//! - RIDECAST_FORECAST_START, RIDECAST_FORECAST_HOURS, RIDECAST_FORECAST_STATIONS - horizon
//! - RUST_LOG - Logging level (optional, default: info)

use demand_forecast::pipeline::{run_stage, Stage};
use demand_forecast::{LocalCatalog, PipelineConfig, RetryingCatalog};
use log::{error, info};
use std::env;
use std::path::PathBuf;
use std::process;

const USAGE: &str = "usage: ridecast <features|train|predict|forecast|all> [--config path]";

fn parse_args(args: &[String]) -> Result<(Stage, Option<PathBuf>), String> {
    let stage = args
        .get(1)
        .ok_or_else(|| USAGE.to_string())?
        .parse::<Stage>()
        .map_err(|e| format!("{}\n{}", e, USAGE))?;

    let config_path = match args.iter().position(|arg| arg == "--config") {
        Some(idx) => Some(
            args.get(idx + 1)
                .map(PathBuf::from)
                .ok_or_else(|| format!("--config needs a path\n{}", USAGE))?,
        ),
        None => None,
    };

    Ok((stage, config_path))
}

fn run(stage: Stage, config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::from_env()?,
    };

    let catalog = RetryingCatalog::new(
        LocalCatalog::open(&config.paths.catalog_dir)?,
        config.catalog.clone(),
    );
    info!("Catalog at {}", config.paths.catalog_dir.display());

    run_stage(stage, &config, &catalog)?;
    Ok(())
}

fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let (stage, config_path) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{}", message);
            process::exit(2);
        }
    };

    info!("ridecast {} starting stage {}", demand_forecast::VERSION, stage);
    if let Err(e) = run(stage, config_path) {
        error!("Stage {} failed: {}", stage, e);
        process::exit(1);
    }
}
