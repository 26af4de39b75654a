//! Population partitions: people grouped by the value of one property.
//!
//! A partition is a derived index. Only its definition is snapshotted;
//! membership is rebuilt from the people and person properties managers
//! when the manager initializes, then kept current through a
//! [`Sensitivity`] over the four kinds of change that can move a person
//! between cells. Each change touches only the affected person, never the
//! whole population.

use std::collections::{BTreeMap, BTreeSet};

use cohort_kernel::{
    Command, Context, DataManager, DataView, Effects, KernelError, Label, Plugin, PluginData,
    Sensitivity,
};
use cohort_properties::{PropertyId, PropertyValue};
use cohort_types::{PersonId, PluginId, SemanticVersion};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::labels::ToLabel;
use crate::people::{self, PeopleDataManager, PersonAddedEvent, PersonRemovedEvent};
use crate::person_properties::{
    self, PersonPropertiesDataManager, PersonPropertyDefinitionEvent, PersonPropertyUpdateEvent,
};
use crate::stochastics;

/// Plugin id of the partitions plugin.
pub const PLUGIN_ID: &str = "partitions";

/// Current version of [`PartitionData`].
pub const VERSION: SemanticVersion = SemanticVersion::new(1, 0, 0);

/// Name of a partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(String);

impl PartitionId {
    /// Create a partition id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Return the id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Definition of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// The partition.
    pub id: PartitionId,
    /// The property whose value selects a person's cell.
    pub property: PropertyId,
}

/// Snapshot of the partitions plugin: definitions only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionData {
    partitions: Vec<PartitionSpec>,
}

impl PartitionData {
    /// No partitions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start from no partitions.
    pub fn builder() -> PartitionDataBuilder {
        PartitionDataBuilder {
            partitions: BTreeMap::new(),
        }
    }

    /// Definitions, by ascending id.
    pub fn partitions(&self) -> &[PartitionSpec] {
        &self.partitions
    }
}

impl PluginData for PartitionData {
    fn plugin_id(&self) -> PluginId {
        PluginId::from(PLUGIN_ID)
    }

    fn version(&self) -> SemanticVersion {
        VERSION
    }

    fn to_json(&self) -> Result<serde_json::Value, KernelError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Builder for [`PartitionData`]. Consumed by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PartitionDataBuilder {
    partitions: BTreeMap<PartitionId, PropertyId>,
}

impl PartitionDataBuilder {
    /// Partition people by `property`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::DuplicateIdentifier`] for a repeated id.
    pub fn add(
        mut self,
        id: impl Into<PartitionId>,
        property: impl Into<PropertyId>,
    ) -> Result<Self, KernelError> {
        let id = id.into();
        if self.partitions.contains_key(&id) {
            return Err(KernelError::duplicate("partition", &id));
        }
        self.partitions.insert(id, property.into());
        Ok(self)
    }

    /// Produce the data.
    pub fn build(self) -> PartitionData {
        PartitionData {
            partitions: self
                .partitions
                .into_iter()
                .map(|(id, property)| PartitionSpec { id, property })
                .collect(),
        }
    }
}

#[derive(Debug)]
struct Partition {
    property: PropertyId,
    cells: BTreeMap<Label, BTreeSet<PersonId>>,
    membership: BTreeMap<PersonId, Label>,
}

impl Partition {
    fn new(property: PropertyId) -> Self {
        Self {
            property,
            cells: BTreeMap::new(),
            membership: BTreeMap::new(),
        }
    }

    /// Move `person` to the cell for `label`, or out of the partition.
    fn place(&mut self, person: PersonId, label: Option<Label>) {
        if let Some(previous) = self.membership.remove(&person)
            && let Some(cell) = self.cells.get_mut(&previous)
        {
            cell.remove(&person);
            if cell.is_empty() {
                self.cells.remove(&previous);
            }
        }
        if let Some(label) = label {
            self.cells.entry(label.clone()).or_default().insert(person);
            self.membership.insert(person, label);
        }
    }

    fn cell(&self, value: &PropertyValue) -> Option<&BTreeSet<PersonId>> {
        self.cells.get(&value.to_label())
    }
}

/// One membership change.
#[derive(Debug, Clone)]
struct Move {
    partition: PartitionId,
    person: PersonId,
    label: Option<Label>,
}

/// Kinds of change that can move people between cells.
#[derive(Debug, Clone)]
enum PartitionChange {
    Added(PersonId),
    Updated {
        person: PersonId,
        property: PropertyId,
        label: Label,
    },
    Removed(PersonId),
    Defined(PropertyId),
}

/// Owner of every partition.
#[derive(Debug, Default)]
pub struct PartitionDataManager {
    partitions: BTreeMap<PartitionId, Partition>,
}

impl PartitionDataManager {
    /// Create empty partitions from their definitions. Membership is filled
    /// in by [`DataManager::init`].
    pub fn from_plugin_data(data: &PartitionData) -> Self {
        Self {
            partitions: data
                .partitions
                .iter()
                .map(|spec| (spec.id.clone(), Partition::new(spec.property.clone())))
                .collect(),
        }
    }

    /// Defined partitions, ascending.
    pub fn partition_ids(&self) -> impl Iterator<Item = &PartitionId> {
        self.partitions.keys()
    }

    /// Whether `id` is defined.
    pub fn contains(&self, id: &PartitionId) -> bool {
        self.partitions.contains_key(id)
    }

    /// People in partition `id` whose property equals `value`, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] for undefined partitions.
    pub fn people_with(
        &self,
        id: &PartitionId,
        value: &PropertyValue,
    ) -> Result<impl Iterator<Item = PersonId> + '_, KernelError> {
        Ok(self
            .partition(id)?
            .cell(value)
            .into_iter()
            .flat_map(|cell| cell.iter().copied()))
    }

    /// Number of people in partition `id` whose property equals `value`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] for undefined partitions.
    pub fn count_with(
        &self,
        id: &PartitionId,
        value: &PropertyValue,
    ) -> Result<usize, KernelError> {
        Ok(self.partition(id)?.cell(value).map_or(0, BTreeSet::len))
    }

    /// Whether `person` sits in the cell for `value`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] for undefined partitions.
    pub fn contains_person(
        &self,
        id: &PartitionId,
        person: PersonId,
        value: &PropertyValue,
    ) -> Result<bool, KernelError> {
        Ok(self
            .partition(id)?
            .membership
            .get(&person)
            .is_some_and(|label| *label == value.to_label()))
    }

    fn partition(&self, id: &PartitionId) -> Result<&Partition, KernelError> {
        self.partitions
            .get(id)
            .ok_or_else(|| KernelError::unknown("partition", id))
    }

    fn apply(&mut self, moves: Vec<Move>) -> Result<(), KernelError> {
        for change in moves {
            self.partitions
                .get_mut(&change.partition)
                .ok_or_else(|| KernelError::unknown("partition", &change.partition))?
                .place(change.person, change.label);
        }
        Ok(())
    }
}

/// Cell label of `person` for `property`, or `None` while the property is
/// undefined.
fn label_for(
    properties: &PersonPropertiesDataManager,
    person: PersonId,
    property: &PropertyId,
) -> Result<Option<Label>, KernelError> {
    if !properties.is_defined(property) {
        return Ok(None);
    }
    Ok(Some(properties.value(person, property)?.to_label()))
}

/// Place every living person into a partition on `property`.
fn populate(
    view: &DataView<'_>,
    partition: &PartitionId,
    property: &PropertyId,
) -> Result<Vec<Move>, KernelError> {
    let people = view.data_manager::<PeopleDataManager>()?;
    let properties = view.data_manager::<PersonPropertiesDataManager>()?;
    people
        .people()
        .map(|person| {
            Ok(Move {
                partition: partition.clone(),
                person,
                label: label_for(properties, person, property)?,
            })
        })
        .collect()
}

fn moves_for(
    view: &DataView<'_>,
    partitions: &PartitionDataManager,
    change: PartitionChange,
) -> Result<Vec<Move>, KernelError> {
    let mut moves = Vec::new();
    match change {
        PartitionChange::Added(person) => {
            let properties = view.data_manager::<PersonPropertiesDataManager>()?;
            for (id, partition) in &partitions.partitions {
                moves.push(Move {
                    partition: id.clone(),
                    person,
                    label: label_for(properties, person, &partition.property)?,
                });
            }
        }
        PartitionChange::Updated {
            person,
            property,
            label,
        } => {
            moves.extend(
                partitions
                    .partitions
                    .iter()
                    .filter(|(_, partition)| partition.property == property)
                    .map(|(id, _)| Move {
                        partition: id.clone(),
                        person,
                        label: Some(label.clone()),
                    }),
            );
        }
        PartitionChange::Removed(person) => {
            moves.extend(
                partitions
                    .partitions
                    .iter()
                    .filter(|(_, partition)| partition.membership.contains_key(&person))
                    .map(|(id, _)| Move {
                        partition: id.clone(),
                        person,
                        label: None,
                    }),
            );
        }
        PartitionChange::Defined(property) => {
            for (id, partition) in &partitions.partitions {
                if partition.property == property {
                    moves.extend(populate(view, id, &property)?);
                }
            }
        }
    }
    Ok(moves)
}

impl DataManager for PartitionDataManager {
    fn name(&self) -> &'static str {
        "partitions"
    }

    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), KernelError> {
        let view = ctx.view();
        let mut moves = Vec::new();
        for (id, partition) in &self.partitions {
            moves.extend(populate(&view, id, &partition.property)?);
        }
        self.apply(moves)?;

        let sensitivity = Sensitivity::new()
            .on(|event: &PersonAddedEvent| Some(PartitionChange::Added(event.person)))
            .on(|event: &PersonPropertyUpdateEvent| {
                Some(PartitionChange::Updated {
                    person: event.person,
                    property: event.property.clone(),
                    label: event.current.to_label(),
                })
            })
            .on(|event: &PersonRemovedEvent| Some(PartitionChange::Removed(event.person)))
            .on(|event: &PersonPropertyDefinitionEvent| {
                Some(PartitionChange::Defined(event.property.clone()))
            });
        ctx.observe(sensitivity, |ctx, change| {
            let view = ctx.view();
            let moves = moves_for(&view, view.data_manager::<Self>()?, change)?;
            if moves.is_empty() {
                return Ok(());
            }
            ctx.submit(MovePeople { moves })
        })?;

        debug!(partitions = self.partitions.len(), "Partitions built");
        Ok(())
    }

    fn to_plugin_data(&self) -> Result<Option<Box<dyn PluginData>>, KernelError> {
        Ok(Some(Box::new(PartitionData {
            partitions: self
                .partitions
                .iter()
                .map(|(id, partition)| PartitionSpec {
                    id: id.clone(),
                    property: partition.property.clone(),
                })
                .collect(),
        })))
    }
}

struct MovePeople {
    moves: Vec<Move>,
}

impl Command for MovePeople {
    type Target = PartitionDataManager;
    type Output = ();

    fn validate(
        &self,
        target: &PartitionDataManager,
        _view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        for change in &self.moves {
            target.partition(&change.partition)?;
        }
        Ok(())
    }

    fn execute(
        self,
        target: &mut PartitionDataManager,
        _effects: &mut Effects<'_>,
    ) -> Result<(), KernelError> {
        target.apply(self.moves)
    }
}

struct AddPartition {
    id: PartitionId,
    property: PropertyId,
    moves: Vec<Move>,
}

impl Command for AddPartition {
    type Target = PartitionDataManager;
    type Output = ();

    fn validate(
        &self,
        target: &PartitionDataManager,
        _view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        if target.contains(&self.id) {
            return Err(KernelError::duplicate("partition", &self.id));
        }
        Ok(())
    }

    fn execute(
        self,
        target: &mut PartitionDataManager,
        _effects: &mut Effects<'_>,
    ) -> Result<(), KernelError> {
        target
            .partitions
            .insert(self.id, Partition::new(self.property));
        target.apply(self.moves)
    }
}

/// Define a partition on `property` while the simulation runs and place
/// every living person in it.
///
/// # Errors
///
/// Returns [`KernelError::DuplicateIdentifier`] if `id` is taken.
pub fn add_partition(
    ctx: &mut Context<'_>,
    id: impl Into<PartitionId>,
    property: impl Into<PropertyId>,
) -> Result<(), KernelError> {
    let id = id.into();
    let property = property.into();
    let moves = populate(&ctx.view(), &id, &property)?;
    ctx.submit(AddPartition {
        id,
        property,
        moves,
    })
}

/// Pick a person uniformly from the cell of partition `id` for `value`.
///
/// Returns `None` for an empty cell without drawing from the generator.
///
/// # Errors
///
/// Returns [`KernelError::UnknownIdentifier`] for undefined partitions.
pub fn sample_person(
    ctx: &mut Context<'_>,
    id: &PartitionId,
    value: &PropertyValue,
) -> Result<Option<PersonId>, KernelError> {
    let count = ctx.data_manager::<PartitionDataManager>()?.count_with(id, value)?;
    if count == 0 {
        return Ok(None);
    }
    let position = stochastics::draw(ctx, |rng| rng.random_range(0..count))?;
    Ok(ctx
        .data_manager::<PartitionDataManager>()?
        .people_with(id, value)?
        .nth(position))
}

/// Build the partitions plugin.
///
/// # Errors
///
/// Propagates plugin construction errors.
pub fn plugin(data: PartitionData) -> Result<Plugin, KernelError> {
    Plugin::builder(PLUGIN_ID)
        .add_dependency(people::PLUGIN_ID)
        .add_dependency(person_properties::PLUGIN_ID)
        .add_dependency(stochastics::PLUGIN_ID)
        .add_plugin_data(data)
        .set_initializer(|ctx| {
            let data = ctx.plugin_data::<PartitionData>()?;
            ctx.add_data_manager(PartitionDataManager::from_plugin_data(data))
        })
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn placing_moves_between_cells_and_prunes_empty_ones() {
        let mut partition = Partition::new(PropertyId::from("health"));
        assert_eq!(partition.property, PropertyId::from("health"));
        assert!(partition.cells.is_empty());
        assert!(partition.membership.is_empty());
        let sick = PropertyValue::from("infectious");
        let well = PropertyValue::from("susceptible");
        partition.place(PersonId::new(1), Some(well.to_label()));
        partition.place(PersonId::new(2), Some(well.to_label()));
        partition.place(PersonId::new(1), Some(sick.to_label()));
        assert_eq!(partition.cell(&well).map(BTreeSet::len), Some(1));
        assert_eq!(partition.cell(&sick).map(BTreeSet::len), Some(1));

        partition.place(PersonId::new(1), None);
        assert!(partition.cell(&sick).is_none());
        assert!(!partition.membership.contains_key(&PersonId::new(1)));
    }

    #[test]
    fn data_builder_rejects_duplicate_ids() {
        let result = PartitionData::builder()
            .add("health", "health")
            .unwrap()
            .add("health", "age");
        assert!(matches!(result, Err(KernelError::DuplicateIdentifier { .. })));
    }
}
