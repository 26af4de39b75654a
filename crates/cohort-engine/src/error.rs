//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps every failure
//! mode of configuration loading, running and writing results.

use std::path::PathBuf;

/// Top-level error for the engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Kernel configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: cohort_kernel::config::ConfigError,
    },

    /// The engine's own configuration sections were invalid.
    #[error("model config error: {message}")]
    Settings {
        /// Description of the problem.
        message: String,
    },

    /// Building or running a simulation failed.
    #[error("simulation error: {source}")]
    Kernel {
        /// The underlying kernel error.
        #[from]
        source: cohort_kernel::KernelError,
    },

    /// Reading an input file failed.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// The file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Writing results failed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// The file or directory.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Serializing results failed.
    #[error("failed to serialize results: {source}")]
    Serialize {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// A replicate task panicked or was cancelled.
    #[error("replicate task failed: {message}")]
    Replicate {
        /// Description of the join failure.
        message: String,
    },
}
