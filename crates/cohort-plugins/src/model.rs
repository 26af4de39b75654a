//! The full epidemic plugin set, fresh or restored from an archive.

use cohort_kernel::{
    KernelError, Plugin, Simulation, SimulationBuilder, SimulationState, SnapshotArchive,
};

use crate::epidemic::{self, EpidemicData, EpidemicParameters};
use crate::partition::{self, PartitionData};
use crate::people::{self, PeopleData};
use crate::person_properties::{self, PersonPropertiesData};
use crate::stochastics::{self, StochasticsData};

/// Plugin data for every plugin of the epidemic model, plus the kernel's
/// own state when resuming.
#[derive(Debug, Clone, PartialEq)]
pub struct EpidemicModel {
    /// Kernel state; `None` starts at time zero.
    pub simulation_state: Option<SimulationState>,
    /// Random stream.
    pub stochastics: StochasticsData,
    /// Population.
    pub people: PeopleData,
    /// Property columns.
    pub person_properties: PersonPropertiesData,
    /// Partition definitions.
    pub partitions: PartitionData,
    /// Model progress.
    pub epidemic: EpidemicData,
}

impl EpidemicModel {
    /// A model that has not started, seeded with `seed`.
    pub fn new(seed: u64, parameters: EpidemicParameters) -> Self {
        Self {
            simulation_state: None,
            stochastics: StochasticsData::builder().set_seed(seed).build(),
            people: PeopleData::empty(),
            person_properties: PersonPropertiesData::default(),
            partitions: PartitionData::empty(),
            epidemic: EpidemicData::new(parameters),
        }
    }

    /// Restore the model from the archive of a halted run.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] naming the first plugin
    /// missing from the archive, [`KernelError::UnsupportedVersion`] for
    /// documents this build cannot load, or [`KernelError::Serialization`]
    /// for malformed bodies.
    pub fn from_archive(archive: &SnapshotArchive) -> Result<Self, KernelError> {
        Ok(Self {
            simulation_state: archive.simulation_state()?,
            stochastics: required(archive, stochastics::PLUGIN_ID, stochastics::VERSION)?,
            people: required(archive, people::PLUGIN_ID, people::VERSION)?,
            person_properties: required(
                archive,
                person_properties::PLUGIN_ID,
                person_properties::VERSION,
            )?,
            partitions: required(archive, partition::PLUGIN_ID, partition::VERSION)?,
            epidemic: required(archive, epidemic::PLUGIN_ID, epidemic::VERSION)?,
        })
    }

    /// Build the plugins, in dependency order.
    ///
    /// # Errors
    ///
    /// Propagates plugin construction errors.
    pub fn plugins(self) -> Result<Vec<Plugin>, KernelError> {
        Ok(vec![
            stochastics::plugin(self.stochastics)?,
            people::plugin(self.people)?,
            person_properties::plugin(self.person_properties)?,
            partition::plugin(self.partitions)?,
            epidemic::plugin(self.epidemic)?,
        ])
    }

    /// A simulation builder holding every plugin and, when resuming, the
    /// archived kernel state.
    ///
    /// # Errors
    ///
    /// Propagates plugin construction errors.
    pub fn simulation_builder(mut self) -> Result<SimulationBuilder, KernelError> {
        let mut builder = Simulation::builder();
        if let Some(state) = self.simulation_state.take() {
            builder = builder.set_simulation_state(state);
        }
        Ok(self
            .plugins()?
            .into_iter()
            .fold(builder, SimulationBuilder::add_plugin))
    }
}

fn required<T: serde::de::DeserializeOwned>(
    archive: &SnapshotArchive,
    plugin_id: &str,
    version: cohort_types::SemanticVersion,
) -> Result<T, KernelError> {
    archive
        .decode(plugin_id, version)?
        .ok_or_else(|| KernelError::unknown("plugin data", &plugin_id))
}
