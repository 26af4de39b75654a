//! Person existence.
//!
//! People are dense indices handed out in order and never reused. Removal
//! is deferred: [`RemovePerson`] publishes a [`PersonImminentRemovalEvent`]
//! and schedules the actual removal for the same instant, so every observer
//! can still read the person's final state before the
//! [`PersonRemovedEvent`] fires.

use std::collections::BTreeMap;

use cohort_kernel::{
    Command, Context, DataManager, DataView, Effects, Event, KernelError, PlanDelay, Plugin,
    PluginData,
};
use cohort_properties::{BooleanContainer, PropertyId, PropertyValue};
use cohort_types::{PersonId, PlanId, PluginId, SemanticVersion};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::person_properties::PersonPropertiesDataManager;

/// Plugin id of the people plugin.
pub const PLUGIN_ID: &str = "people";

/// Current version of [`PeopleData`].
pub const VERSION: SemanticVersion = SemanticVersion::new(1, 0, 0);

/// A removal that was scheduled but had not happened when the run halted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendingRemoval {
    /// The person being removed.
    pub person: PersonId,
    /// The plan that completes the removal.
    pub plan: PlanId,
    /// When the plan fires.
    pub time: f64,
}

/// Snapshot of the people plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeopleData {
    next_person: u32,
    people: Vec<PersonId>,
    pending_removals: Vec<PendingRemoval>,
}

impl PeopleData {
    /// Data for a simulation that starts with nobody.
    pub fn empty() -> Self {
        Self::default()
    }

    /// First id not yet issued.
    pub const fn next_person(&self) -> u32 {
        self.next_person
    }

    /// Living people, ascending.
    pub fn people(&self) -> &[PersonId] {
        &self.people
    }

    /// Removals in flight.
    pub fn pending_removals(&self) -> &[PendingRemoval] {
        &self.pending_removals
    }
}

impl PluginData for PeopleData {
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

/// A person joined the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonAddedEvent {
    /// The new person.
    pub person: PersonId,
    /// Initial property values supplied with the person.
    pub property_values: BTreeMap<PropertyId, PropertyValue>,
}

impl Event for PersonAddedEvent {}

/// A person will be removed once the current instant's plans have run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonImminentRemovalEvent {
    /// The person being removed.
    pub person: PersonId,
}

impl Event for PersonImminentRemovalEvent {}

/// A person left the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonRemovedEvent {
    /// The removed person.
    pub person: PersonId,
}

impl Event for PersonRemovedEvent {}

/// Owner of person existence.
#[derive(Debug)]
pub struct PeopleDataManager {
    next_person: u32,
    alive: BooleanContainer,
    population: usize,
    pending_removals: BTreeMap<PersonId, (PlanId, f64)>,
}

impl PeopleDataManager {
    /// Rebuild from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Precondition`] if the snapshot lists a person
    /// at or beyond its own id limit.
    pub fn from_plugin_data(data: &PeopleData) -> Result<Self, KernelError> {
        let mut alive = BooleanContainer::new(false);
        alive.expand_capacity(usize::try_from(data.next_person).unwrap_or(usize::MAX));
        for person in &data.people {
            if person.value() >= data.next_person {
                return Err(KernelError::precondition(format!(
                    "person {person} is not below the id limit {}",
                    data.next_person
                )));
            }
            alive.set(person.index(), true)?;
        }
        Ok(Self {
            next_person: data.next_person,
            population: alive.count_true(),
            alive,
            pending_removals: data
                .pending_removals
                .iter()
                .map(|removal| (removal.person, (removal.plan, removal.time)))
                .collect(),
        })
    }

    /// Whether `person` was added and has not been removed.
    pub fn person_exists(&self, person: PersonId) -> bool {
        self.alive.get(person.index()).unwrap_or(false)
    }

    /// Number of living people.
    pub const fn population(&self) -> usize {
        self.population
    }

    /// First id not yet issued.
    pub const fn person_id_limit(&self) -> u32 {
        self.next_person
    }

    /// Living people, ascending.
    pub fn people(&self) -> impl Iterator<Item = PersonId> + '_ {
        self.alive
            .iter_true()
            .filter_map(|offset| u32::try_from(offset).ok())
            .map(PersonId::new)
    }

    /// Whether a removal of `person` is in flight.
    pub fn is_removal_pending(&self, person: PersonId) -> bool {
        self.pending_removals.contains_key(&person)
    }

    /// Fail unless `person` exists.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] for unknown or removed
    /// people.
    pub fn require_person(&self, person: PersonId) -> Result<(), KernelError> {
        if self.person_exists(person) {
            Ok(())
        } else {
            Err(KernelError::unknown("person", &person))
        }
    }
}

impl DataManager for PeopleDataManager {
    fn name(&self) -> &'static str {
        "people"
    }

    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), KernelError> {
        for (&person, &(plan, time)) in &self.pending_removals {
            ctx.resume_plan(plan, time, move |ctx| complete_removal(ctx, person))?;
        }
        debug!(
            population = self.population,
            pending_removals = self.pending_removals.len(),
            "People loaded"
        );
        Ok(())
    }

    fn to_plugin_data(&self) -> Result<Option<Box<dyn PluginData>>, KernelError> {
        Ok(Some(Box::new(PeopleData {
            next_person: self.next_person,
            people: self.people().collect(),
            pending_removals: self
                .pending_removals
                .iter()
                .map(|(&person, &(plan, time))| PendingRemoval { person, plan, time })
                .collect(),
        })))
    }
}

fn complete_removal(ctx: &mut Context<'_>, person: PersonId) -> Result<(), KernelError> {
    ctx.submit(CompleteRemoval { person })
}

/// Add a person, optionally with initial property values.
#[derive(Debug, Clone, Default)]
pub struct AddPerson {
    property_values: BTreeMap<PropertyId, PropertyValue>,
}

impl AddPerson {
    /// A person with no explicit property values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Supply an initial value for `property`.
    #[must_use]
    pub fn with_value(
        mut self,
        property: impl Into<PropertyId>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.property_values.insert(property.into(), value.into());
        self
    }
}

impl Command for AddPerson {
    type Target = PeopleDataManager;
    type Output = PersonId;

    /// Initial values are checked against the person properties manager
    /// when one is present.
    fn validate(
        &self,
        target: &PeopleDataManager,
        view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        if target.next_person == u32::MAX {
            return Err(KernelError::precondition("person ids exhausted"));
        }
        match view.try_data_manager::<PersonPropertiesDataManager>() {
            Some(properties) => properties.check_initial_values(&self.property_values),
            None if self.property_values.is_empty() => Ok(()),
            None => Err(KernelError::precondition(
                "property values supplied without a person properties plugin",
            )),
        }
    }

    fn execute(
        self,
        target: &mut PeopleDataManager,
        effects: &mut Effects<'_>,
    ) -> Result<PersonId, KernelError> {
        let person = PersonId::new(target.next_person);
        target.alive.set(person.index(), true)?;
        target.next_person = target
            .next_person
            .checked_add(1)
            .ok_or(KernelError::Internal("person id overflow after validation"))?;
        target.population = target.population.saturating_add(1);
        effects.publish(PersonAddedEvent {
            person,
            property_values: self.property_values,
        });
        Ok(person)
    }
}

/// Start removing a person.
#[derive(Debug, Clone, Copy)]
pub struct RemovePerson {
    /// The person to remove.
    pub person: PersonId,
}

impl Command for RemovePerson {
    type Target = PeopleDataManager;
    type Output = PlanId;

    fn validate(
        &self,
        target: &PeopleDataManager,
        _view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        target.require_person(self.person)?;
        if target.is_removal_pending(self.person) {
            return Err(KernelError::precondition(format!(
                "removal of person {} is already pending",
                self.person
            )));
        }
        Ok(())
    }

    fn execute(
        self,
        target: &mut PeopleDataManager,
        effects: &mut Effects<'_>,
    ) -> Result<PlanId, KernelError> {
        let person = self.person;
        let plan = effects.schedule(PlanDelay::ZERO, move |ctx| complete_removal(ctx, person));
        target
            .pending_removals
            .insert(person, (plan, effects.time()));
        effects.publish(PersonImminentRemovalEvent { person });
        Ok(plan)
    }
}

/// Finish a removal started by [`RemovePerson`].
struct CompleteRemoval {
    person: PersonId,
}

impl Command for CompleteRemoval {
    type Target = PeopleDataManager;
    type Output = ();

    fn validate(
        &self,
        target: &PeopleDataManager,
        _view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        if target.is_removal_pending(self.person) {
            Ok(())
        } else {
            Err(KernelError::precondition(format!(
                "no removal pending for person {}",
                self.person
            )))
        }
    }

    fn execute(
        self,
        target: &mut PeopleDataManager,
        effects: &mut Effects<'_>,
    ) -> Result<(), KernelError> {
        target.alive.set(self.person.index(), false)?;
        target.pending_removals.remove(&self.person);
        target.population = target.population.saturating_sub(1);
        effects.publish(PersonRemovedEvent {
            person: self.person,
        });
        Ok(())
    }
}

/// Build the people plugin.
///
/// # Errors
///
/// Propagates plugin construction errors.
pub fn plugin(data: PeopleData) -> Result<Plugin, KernelError> {
    Plugin::builder(PLUGIN_ID)
        .add_plugin_data(data)
        .set_initializer(|ctx| {
            let data = ctx.plugin_data::<PeopleData>()?;
            ctx.add_data_manager(PeopleDataManager::from_plugin_data(data)?)
        })
        .build()
}
