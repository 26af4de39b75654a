//! Segmented replicate runs and parallel sweeps.
//!
//! A replicate is one model run, optionally split into halt/resume
//! segments: each segment halts with a snapshot, and the next one is built
//! from that snapshot alone. Splitting never changes the result; it is how
//! long runs checkpoint. A sweep runs several replicates with consecutive
//! seeds on tokio's blocking pool, each with fully independent kernel
//! state.

use cohort_kernel::config::{RunConfig, SimulationConfig};
use cohort_kernel::{EndReason, SimulationState, SnapshotArchive};
use cohort_plugins::{DailyCounts, EpidemicModel};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::settings::EngineSettings;

/// What one replicate produced.
#[derive(Debug)]
pub struct ReplicateResult {
    /// Replicate index within the sweep.
    pub replicate: u32,
    /// Seed of a fresh run; `None` when continuing an archive.
    pub seed: Option<u64>,
    /// Why the final segment stopped.
    pub end_reason: EndReason,
    /// Simulation time at the end of the final segment.
    pub time: f64,
    /// Final snapshot, when `run.produce_snapshot_on_halt` is set.
    pub archive: Option<SnapshotArchive>,
    /// Daily counts from every segment, in order.
    pub daily: Vec<DailyCounts>,
}

/// Halt times of every segment but the last, evenly spaced between
/// `start` and `end`.
fn intermediate_halts(start: f64, end: f64, segments: u32) -> Vec<f64> {
    if end <= start {
        return Vec::new();
    }
    let span = end - start;
    (1..segments)
        .map(|segment| start + span * f64::from(segment) / f64::from(segments))
        .collect()
}

/// Run one replicate from `model` in `segments` pieces.
///
/// Without a configured halt time the intermediate halts are spread over
/// the model's day count and the last segment runs until the plan queue
/// empties.
///
/// # Errors
///
/// Returns [`EngineError::Kernel`] if building, running or restoring any
/// segment fails.
pub fn run_replicate(
    replicate: u32,
    seed: Option<u64>,
    mut model: EpidemicModel,
    run: &RunConfig,
    segments: u32,
) -> Result<ReplicateResult, EngineError> {
    let start = model
        .simulation_state
        .as_ref()
        .map_or(0.0, SimulationState::time);
    let end = run
        .halt_time
        .unwrap_or_else(|| f64::from(model.epidemic.parameters().days));
    let mut daily = Vec::new();

    let halts = intermediate_halts(start, end, segments);
    for (segment, halt_time) in halts.into_iter().enumerate() {
        let output = model
            .simulation_builder()?
            .configure(run)
            .set_halt_time(halt_time)
            .set_produce_snapshot_on_halt(true)
            .build()?
            .execute()?;
        daily.extend(output.outputs::<DailyCounts>().copied());
        debug!(
            replicate,
            segment,
            time = output.time(),
            pending_plans = output.pending_plans(),
            "Segment halted"
        );
        model = EpidemicModel::from_archive(&output.to_archive()?)?;
    }

    let output = model.simulation_builder()?.configure(run).build()?.execute()?;
    daily.extend(output.outputs::<DailyCounts>().copied());
    let archive = if run.produce_snapshot_on_halt {
        Some(output.to_archive()?)
    } else {
        None
    };
    Ok(ReplicateResult {
        replicate,
        seed,
        end_reason: output.end_reason(),
        time: output.time(),
        archive,
        daily,
    })
}

/// Run `sweep.replicates` replicates in parallel.
///
/// Fresh replicate `i` uses seed `run.seed + i`. A resumed sweep continues
/// the archive's own random stream, so it is limited to one replicate.
/// Results are returned in replicate order.
///
/// # Errors
///
/// Returns [`EngineError::Settings`] for a multi-replicate resume,
/// [`EngineError::Replicate`] if a task panics, or the first replicate's
/// own error.
pub async fn run_sweep(
    config: &SimulationConfig,
    settings: &EngineSettings,
    resume: Option<SnapshotArchive>,
) -> Result<Vec<ReplicateResult>, EngineError> {
    let replicates = config.sweep.replicates.max(1);
    let segments = config.sweep.segments.max(1);
    if resume.is_some() && replicates > 1 {
        return Err(EngineError::Settings {
            message: format!(
                "resuming an archive runs a single replicate, but {replicates} were requested"
            ),
        });
    }

    let mut tasks = JoinSet::new();
    for replicate in 0..replicates {
        let (model, seed) = match &resume {
            Some(archive) => (EpidemicModel::from_archive(archive)?, None),
            None => {
                let seed = config.run.seed.wrapping_add(u64::from(replicate));
                (EpidemicModel::new(seed, settings.model.clone()), Some(seed))
            }
        };
        let run = config.run.clone();
        tasks.spawn_blocking(move || run_replicate(replicate, seed, model, &run, segments));
    }
    info!(replicates, segments, "Replicates dispatched");

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| EngineError::Replicate {
            message: format!("{e}"),
        })?;
        match result {
            Ok(result) => {
                info!(
                    replicate = result.replicate,
                    seed = ?result.seed,
                    end_reason = ?result.end_reason,
                    time = result.time,
                    days = result.daily.len(),
                    "Replicate finished"
                );
                results.push(result);
            }
            Err(error) => {
                warn!(error = %error, "Replicate failed, aborting sweep");
                tasks.abort_all();
                return Err(error);
            }
        }
    }
    results.sort_by_key(|result| result.replicate);
    Ok(results)
}
