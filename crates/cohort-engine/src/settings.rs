//! Configuration sections owned by the engine.
//!
//! The kernel reads `run`, `logging` and `sweep` from `cohort-config.yaml`.
//! The engine reads two more sections of the same document: `model` holds
//! the epidemic parameters and `output` says where results go and which
//! archive, if any, to resume from. Missing sections take their defaults.

use std::path::PathBuf;

use cohort_plugins::EpidemicParameters;
use serde::Deserialize;

use crate::error::EngineError;

/// The engine's configuration sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSettings {
    /// Epidemic parameters.
    pub model: EpidemicParameters,
    /// Result destination and resume source.
    pub output: OutputConfig,
}

/// Where results are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving one archive and one daily-count file per
    /// replicate.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Archive of a halted run to continue instead of starting fresh.
    #[serde(default)]
    pub resume_from: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            resume_from: None,
        }
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("cohort-output")
}

impl EngineSettings {
    /// Extract the `model` and `output` sections from a YAML document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Settings`] if the document is not YAML or a
    /// section does not match its schema.
    pub fn parse(yaml: &str) -> Result<Self, EngineError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: serde_yml::Value =
            serde_yml::from_str(yaml).map_err(|e| EngineError::Settings {
                message: format!("failed to parse config YAML: {e}"),
            })?;

        let model = match raw.get("model") {
            Some(value) => {
                serde_yml::from_value(value.clone()).map_err(|e| EngineError::Settings {
                    message: format!("failed to parse model config: {e}"),
                })?
            }
            None => EpidemicParameters::default(),
        };
        let output = match raw.get("output") {
            Some(value) => {
                serde_yml::from_value(value.clone()).map_err(|e| EngineError::Settings {
                    message: format!("failed to parse output config: {e}"),
                })?
            }
            None => OutputConfig::default(),
        };
        Ok(Self { model, output })
    }
}
