//! The kernel's own plugin data: where a halted run stopped.

use cohort_types::{PlanId, PluginId, SemanticVersion};
use serde::{Deserialize, Serialize};

use crate::plan::check_plan_time;
use crate::{KernelError, PluginData};

/// Clock reading and plan counter of a halted run.
///
/// Restoring both makes plans scheduled by the resumed run receive the same
/// ids, and therefore the same same-time ordering, as in a run that never
/// paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StateRecord")]
pub struct SimulationState {
    time: f64,
    next_plan_id: PlanId,
}

impl SimulationState {
    /// Plugin id under which the state is archived.
    pub const PLUGIN_ID: &'static str = "simulation_state";

    /// Current data version.
    pub const VERSION: SemanticVersion = SemanticVersion::new(1, 0, 0);

    /// Start building a state.
    pub const fn builder() -> SimulationStateBuilder {
        SimulationStateBuilder {
            time: 0.0,
            next_plan_id: PlanId::new(0),
        }
    }

    pub(crate) const fn new(time: f64, next_plan_id: PlanId) -> Self {
        Self { time, next_plan_id }
    }

    /// Simulation time at which the run halted.
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// First plan id the halted run had not issued.
    pub const fn next_plan_id(&self) -> PlanId {
        self.next_plan_id
    }
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::new(0.0, PlanId::new(0))
    }
}

impl PluginData for SimulationState {
    fn plugin_id(&self) -> PluginId {
        PluginId::from(Self::PLUGIN_ID)
    }

    fn version(&self) -> SemanticVersion {
        Self::VERSION
    }

    fn to_json(&self) -> Result<serde_json::Value, KernelError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Wire form of [`SimulationState`], validated by the builder on the way in.
#[derive(Deserialize)]
struct StateRecord {
    time: f64,
    next_plan_id: PlanId,
}

impl TryFrom<StateRecord> for SimulationState {
    type Error = KernelError;

    fn try_from(record: StateRecord) -> Result<Self, Self::Error> {
        Self::builder()
            .set_time(record.time)
            .set_next_plan_id(record.next_plan_id)
            .build()
    }
}

/// Builder for [`SimulationState`]. Consumed by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct SimulationStateBuilder {
    time: f64,
    next_plan_id: PlanId,
}

impl SimulationStateBuilder {
    /// Set the start time.
    #[must_use]
    pub const fn set_time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    /// Set the first plan id to issue.
    #[must_use]
    pub const fn set_next_plan_id(mut self, id: PlanId) -> Self {
        self.next_plan_id = id;
        self
    }

    /// Produce the state.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidPlanTime`] if the time is negative or
    /// not finite.
    pub fn build(self) -> Result<SimulationState, KernelError> {
        check_plan_time(self.time, 0.0)?;
        Ok(SimulationState::new(self.time, self.next_plan_id))
    }
}
