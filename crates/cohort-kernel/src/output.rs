//! Run outputs and the snapshot archive.
//!
//! [`SimulationOutput`] is what [`Simulation::execute`](crate::Simulation::execute)
//! returns: run metadata, the final [`SimulationState`], every data
//! manager's plugin data (when snapshots were requested) and the ad hoc
//! values released through [`Context::release_output`](crate::Context::release_output).
//!
//! [`SnapshotArchive`] is the persisted form: one JSON document per plugin
//! data value, each tagged with its plugin id and version string.

use core::any::Any;
use core::fmt;

use chrono::{DateTime, Utc};
use cohort_types::{PluginId, RunId, SemanticVersion};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{KernelError, PluginData, SimulationState, check_version};

/// Ad hoc outputs released during a run, in release order.
#[derive(Default)]
pub(crate) struct OutputSink {
    items: Vec<Box<dyn Any + Send + Sync>>,
}

impl OutputSink {
    pub(crate) fn push<T: Any + Send + Sync>(&mut self, item: T) {
        self.items.push(Box::new(item));
    }

    fn of_type<T: Any>(&self) -> impl Iterator<Item = &T> {
        self.items.iter().filter_map(|item| item.downcast_ref::<T>())
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("items", &self.items.len())
            .finish()
    }
}

/// Why the plan loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// No plans remained.
    QueueEmpty,
    /// The next plan lies beyond the halt time. Pending plans are left for a
    /// resumed run.
    HaltTimeReached,
    /// A callback requested a stop.
    StopRequested,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct SimulationOutput {
    pub(crate) run_id: RunId,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) completed_at: DateTime<Utc>,
    pub(crate) end_reason: EndReason,
    pub(crate) pending_plans: usize,
    pub(crate) simulation_state: SimulationState,
    pub(crate) plugin_datas: Vec<Box<dyn PluginData>>,
    pub(crate) outputs: OutputSink,
}

impl SimulationOutput {
    /// Identifier of this execution.
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Wall-clock start.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock end.
    pub const fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Why the run stopped.
    pub const fn end_reason(&self) -> EndReason {
        self.end_reason
    }

    /// Final simulation time.
    pub const fn time(&self) -> f64 {
        self.simulation_state.time()
    }

    /// Plans still queued when the run stopped.
    pub const fn pending_plans(&self) -> usize {
        self.pending_plans
    }

    /// Clock and plan counter to resume from.
    pub const fn simulation_state(&self) -> &SimulationState {
        &self.simulation_state
    }

    /// Final plugin data of every data manager, in initialization order.
    /// Empty unless snapshots on halt were requested.
    pub fn plugin_datas(&self) -> &[Box<dyn PluginData>] {
        &self.plugin_datas
    }

    /// Final plugin data of type `T`.
    pub fn plugin_data<T: PluginData>(&self) -> Option<&T> {
        self.plugin_datas
            .iter()
            .find_map(|data| (**data).as_any().downcast_ref::<T>())
    }

    /// Released outputs of type `T`, in release order.
    pub fn outputs<T: Any>(&self) -> impl Iterator<Item = &T> {
        self.outputs.of_type::<T>()
    }

    /// Persistable form of the final state.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Serialization`] if any plugin data fails to
    /// serialize.
    pub fn to_archive(&self) -> Result<SnapshotArchive, KernelError> {
        let documents = core::iter::once(SnapshotDocument::capture(&self.simulation_state))
            .chain(
                self.plugin_datas
                    .iter()
                    .map(|data| SnapshotDocument::capture(&**data)),
            )
            .collect::<Result<_, _>>()?;
        Ok(SnapshotArchive { documents })
    }
}

/// One serialized plugin data value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// Owning plugin.
    pub plugin_id: PluginId,
    /// Data version, `major.minor.patch`.
    pub version: String,
    /// The serialized value.
    pub data: serde_json::Value,
}

impl SnapshotDocument {
    /// Serialize one plugin data value.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Serialization`] if the value fails to serialize.
    pub fn capture(data: &dyn PluginData) -> Result<Self, KernelError> {
        Ok(Self {
            plugin_id: data.plugin_id(),
            version: data.version().to_string(),
            data: data.to_json()?,
        })
    }

    /// Decode the value after checking its version.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnsupportedVersion`] before touching the body
    /// if the version cannot be loaded, or [`KernelError::Serialization`] if
    /// the body does not match `T`.
    pub fn decode<T: DeserializeOwned>(
        &self,
        supported: SemanticVersion,
    ) -> Result<T, KernelError> {
        check_version(&self.plugin_id, supported, &self.version)?;
        Ok(T::deserialize(&self.data)?)
    }
}

/// Serialized final state of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotArchive {
    /// One document per plugin data value.
    pub documents: Vec<SnapshotDocument>,
}

impl SnapshotArchive {
    /// Serialize a set of plugin data values.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Serialization`] if any value fails to serialize.
    pub fn capture<'a>(
        datas: impl IntoIterator<Item = &'a dyn PluginData>,
    ) -> Result<Self, KernelError> {
        let documents = datas
            .into_iter()
            .map(SnapshotDocument::capture)
            .collect::<Result<_, _>>()?;
        Ok(Self { documents })
    }

    /// The document written by `plugin_id`.
    pub fn document(&self, plugin_id: &str) -> Option<&SnapshotDocument> {
        self.documents
            .iter()
            .find(|document| document.plugin_id.as_str() == plugin_id)
    }

    /// Decode the document written by `plugin_id`, if present.
    ///
    /// # Errors
    ///
    /// See [`SnapshotDocument::decode`].
    pub fn decode<T: DeserializeOwned>(
        &self,
        plugin_id: &str,
        supported: SemanticVersion,
    ) -> Result<Option<T>, KernelError> {
        self.document(plugin_id)
            .map(|document| document.decode(supported))
            .transpose()
    }

    /// The archived simulation state, if present.
    ///
    /// # Errors
    ///
    /// See [`SnapshotDocument::decode`].
    pub fn simulation_state(&self) -> Result<Option<SimulationState>, KernelError> {
        self.decode(SimulationState::PLUGIN_ID, SimulationState::VERSION)
    }

    /// Render as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Serialization`] on failure.
    pub fn to_json(&self) -> Result<String, KernelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Serialization`] if the text is not an archive.
    pub fn from_json(text: &str) -> Result<Self, KernelError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use cohort_types::PlanId;

    #[test]
    fn archive_round_trips_simulation_state() {
        let state = SimulationState::new(9.5, PlanId::new(31));
        let archive = SnapshotArchive::capture([&state as &dyn PluginData]).unwrap();
        let text = archive.to_json().unwrap();
        let parsed = SnapshotArchive::from_json(&text).unwrap();
        assert_eq!(parsed, archive);
        assert_eq!(parsed.simulation_state().unwrap(), Some(state));
    }

    #[test]
    fn version_is_checked_before_decoding() {
        let document = SnapshotDocument {
            plugin_id: PluginId::from(SimulationState::PLUGIN_ID),
            version: "2.0.0".to_owned(),
            data: serde_json::json!("not a state"),
        };
        assert!(matches!(
            document.decode::<SimulationState>(SimulationState::VERSION),
            Err(KernelError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn missing_document_decodes_to_none() {
        let archive = SnapshotArchive::default();
        assert_eq!(archive.simulation_state().unwrap(), None);
    }
}
