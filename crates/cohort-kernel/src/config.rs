//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `cohort-config.yaml`. Sections not
//! present in the file take their defaults, so an empty document is a valid
//! configuration. Model-specific parameters live in sections owned by the
//! binary that runs the model and are ignored here.

use std::path::Path;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override held an unparsable value.
    #[error("invalid value {value:?} in environment variable {variable}")]
    InvalidOverride {
        /// The variable name.
        variable: &'static str,
        /// The offending value.
        value: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level kernel configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Run control: halt time, snapshots, seed.
    #[serde(default)]
    pub run: RunConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Segmenting and replicate sweeps.
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `COHORT_SEED` overrides `run.seed`
    /// - `COHORT_HALT_TIME` overrides `run.halt_time`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::InvalidOverride`] for an unparsable override.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::InvalidOverride`] for an unparsable override.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::parse_without_overrides(yaml)?;
        config.run.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse_without_overrides(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yml reads an empty document as null rather than an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }
}

/// Run control.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunConfig {
    /// Simulation time at which to halt. `None` runs until the plan queue
    /// empties or a stop is requested.
    #[serde(default)]
    pub halt_time: Option<f64>,

    /// Whether to collect every data manager's plugin data on halt.
    #[serde(default = "default_produce_snapshot_on_halt")]
    pub produce_snapshot_on_halt: bool,

    /// Seed for the stochastics plugin.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl RunConfig {
    /// Apply `COHORT_SEED` and `COHORT_HALT_TIME`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if a variable is set to an
    /// unparsable value.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("COHORT_SEED") {
            self.seed = value
                .trim()
                .parse()
                .map_err(|_parse_err| ConfigError::InvalidOverride {
                    variable: "COHORT_SEED",
                    value,
                })?;
        }
        if let Ok(value) = std::env::var("COHORT_HALT_TIME") {
            let halt_time = value
                .trim()
                .parse::<f64>()
                .map_err(|_parse_err| ConfigError::InvalidOverride {
                    variable: "COHORT_HALT_TIME",
                    value,
                })?;
            self.halt_time = Some(halt_time);
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            halt_time: None,
            produce_snapshot_on_halt: default_produce_snapshot_on_halt(),
            seed: default_seed(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Segmenting and replicate sweeps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SweepConfig {
    /// Independent replicates to run in parallel.
    #[serde(default = "default_replicates")]
    pub replicates: u32,

    /// Halt/resume segments each replicate is split into.
    #[serde(default = "default_segments")]
    pub segments: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            replicates: default_replicates(),
            segments: default_segments(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_produce_snapshot_on_halt() -> bool {
    true
}

const fn default_seed() -> u64 {
    42
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_replicates() -> u32 {
    1
}

const fn default_segments() -> u32 {
    1
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = SimulationConfig::parse_without_overrides("").unwrap();
        assert_eq!(config, SimulationConfig::default());
        assert!(config.run.produce_snapshot_on_halt);
        assert_eq!(config.run.seed, 42);
        assert_eq!(config.sweep.segments, 1);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = "\
run:
  halt_time: 120.0
sweep:
  replicates: 8
logging:
  level: debug
";
        let config = SimulationConfig::parse_without_overrides(yaml).unwrap();
        assert_eq!(config.run.halt_time, Some(120.0));
        assert_eq!(config.run.seed, 42);
        assert_eq!(config.sweep.replicates, 8);
        assert_eq!(config.sweep.segments, 1);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json);
    }

    #[test]
    fn unknown_sections_are_ignored() {
        let yaml = "model:\n  initial_population: 500\n";
        let config = SimulationConfig::parse_without_overrides(yaml).unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn malformed_yaml_is_reported() {
        let result = SimulationConfig::parse_without_overrides("run: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
