//! Writing replicate results to disk.
//!
//! Each replicate gets `replicate-NNN-archive.json`, its final snapshot
//! archive (loadable through `output.resume_from`), and
//! `replicate-NNN-daily.json`, its daily counts.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::EngineError;
use crate::runner::ReplicateResult;

fn write(path: PathBuf, contents: &str) -> Result<PathBuf, EngineError> {
    std::fs::write(&path, contents).map_err(|source| EngineError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Write every replicate's files into `directory`, creating it if needed.
///
/// Returns the paths written, in replicate order.
///
/// # Errors
///
/// Returns [`EngineError::Write`] for I/O failures and
/// [`EngineError::Serialize`] if results cannot be rendered as JSON.
pub fn write_results(
    directory: &Path,
    results: &[ReplicateResult],
) -> Result<Vec<PathBuf>, EngineError> {
    std::fs::create_dir_all(directory).map_err(|source| EngineError::Write {
        path: directory.to_path_buf(),
        source,
    })?;

    let mut written = Vec::new();
    for result in results {
        let stem = format!("replicate-{:03}", result.replicate);
        if let Some(archive) = &result.archive {
            let path = directory.join(format!("{stem}-archive.json"));
            written.push(write(path, &archive.to_json()?)?);
        }
        let path = directory.join(format!("{stem}-daily.json"));
        written.push(write(path, &serde_json::to_string_pretty(&result.daily)?)?);
    }
    info!(
        directory = %directory.display(),
        files = written.len(),
        "Results written"
    );
    Ok(written)
}

/// Read the archive of a halted run.
///
/// # Errors
///
/// Returns [`EngineError::Read`] if the file cannot be read and
/// [`EngineError::Kernel`] if it is not an archive.
pub fn read_archive(path: &Path) -> Result<cohort_kernel::SnapshotArchive, EngineError> {
    let text = std::fs::read_to_string(path).map_err(|source| EngineError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cohort_kernel::SnapshotArchive::from_json(&text)?)
}
