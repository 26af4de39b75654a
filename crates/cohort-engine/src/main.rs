//! Engine binary for the Cohort simulation kernel.
//!
//! Runs the reference epidemic model the way production models are run:
//! configuration from `cohort-config.yaml`, structured logging, optional
//! halt/resume segmenting, parallel replicates, and snapshot archives on
//! disk that a later invocation can continue from.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `cohort-config.yaml` (defaults when absent)
//! 2. Initialize structured logging (tracing)
//! 3. Read the archive to resume from, if configured
//! 4. Run the replicate sweep
//! 5. Write archives and daily counts

mod error;
mod output;
mod runner;
mod settings;

use std::path::Path;

use cohort_kernel::config::{LoggingConfig, SimulationConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::settings::EngineSettings;

const CONFIG_PATH: &str = "cohort-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration, any replicate, or writing results
/// fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, settings) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("cohort-engine starting");
    info!(
        seed = config.run.seed,
        halt_time = ?config.run.halt_time,
        replicates = config.sweep.replicates,
        segments = config.sweep.segments,
        days = settings.model.days,
        initial_population = settings.model.initial_population,
        "Configuration loaded"
    );

    // 3. Read the archive to resume from.
    let resume = match &settings.output.resume_from {
        Some(path) => {
            let archive = output::read_archive(path)?;
            info!(path = %path.display(), documents = archive.documents.len(), "Resuming archive");
            Some(archive)
        }
        None => None,
    };

    // 4. Run.
    let results = runner::run_sweep(&config, &settings, resume).await?;

    // 5. Write results.
    let written = output::write_results(&settings.output.directory, &results)?;

    info!(
        replicates = results.len(),
        files = written.len(),
        "cohort-engine shutdown complete"
    );
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Load the kernel configuration and the engine's own sections from
/// `cohort-config.yaml`.
///
/// Looks for the config file relative to the current working directory.
/// Environment overrides apply either way.
fn load_config() -> Result<(SimulationConfig, EngineSettings), EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|source| EngineError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        Ok((
            SimulationConfig::parse(&contents)?,
            EngineSettings::parse(&contents)?,
        ))
    } else {
        Ok((SimulationConfig::parse("")?, EngineSettings::default()))
    }
}
