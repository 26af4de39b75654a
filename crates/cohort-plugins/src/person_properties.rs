//! Per-person property values.
//!
//! Each property is a [`PropertyValues`] column indexed by person. The
//! manager checks existence, mutability and value types in the validate
//! phase of each command, so a column is never touched by a rejected
//! command. Changes are announced as [`PersonPropertyUpdateEvent`]s, which
//! carry three labelers:
//!
//! | Labeler | Label |
//! |---|---|
//! | [`PROPERTY_LABELER`] | the property id |
//! | [`PROPERTY_VALUE_LABELER`] | `(property id, new value)` |
//! | [`PERSON_LABELER`] | the person |

use std::collections::BTreeMap;

use cohort_kernel::{
    Command, Context, DataManager, DataView, Effects, Event, EventFilter, EventLabeler,
    KernelError, Label, Plugin, PluginData,
};
use cohort_properties::{PropertyDefinition, PropertyId, PropertyValue, PropertyValues};
use cohort_types::{PersonId, PluginId, SemanticVersion};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::labels::ToLabel;
use crate::people::{self, PeopleDataManager, PersonAddedEvent, PersonRemovedEvent};

/// Plugin id of the person properties plugin.
pub const PLUGIN_ID: &str = "person_properties";

/// Current version of [`PersonPropertiesData`].
pub const VERSION: SemanticVersion = SemanticVersion::new(1, 0, 0);

/// Labels updates by property.
pub const PROPERTY_LABELER: &str = "person_property.property";

/// Labels updates by property and new value.
pub const PROPERTY_VALUE_LABELER: &str = "person_property.property_value";

/// Labels updates by person.
pub const PERSON_LABELER: &str = "person_property.person";

/// One explicitly assigned value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedValue {
    /// The person.
    pub person: PersonId,
    /// The assigned value.
    pub value: PropertyValue,
    /// Assignment time, for time-tracked properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

/// Snapshot of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    /// The property.
    pub id: PropertyId,
    /// Its definition.
    pub definition: PropertyDefinition,
    /// Assignment time reported for people never explicitly assigned.
    pub defined_at: f64,
    /// Explicit values, by ascending person. People absent here hold the
    /// default.
    pub values: Vec<AssignedValue>,
}

/// Snapshot of the person properties plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonPropertiesData {
    properties: Vec<PropertySnapshot>,
}

impl PersonPropertiesData {
    /// Start building the data.
    pub fn builder() -> PersonPropertiesDataBuilder {
        PersonPropertiesDataBuilder {
            properties: BTreeMap::new(),
        }
    }

    /// Property snapshots, by ascending id.
    pub fn properties(&self) -> &[PropertySnapshot] {
        &self.properties
    }
}

impl PluginData for PersonPropertiesData {
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

/// Builder for [`PersonPropertiesData`]. Consumed by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PersonPropertiesDataBuilder {
    properties: BTreeMap<PropertyId, PropertySnapshot>,
}

impl PersonPropertiesDataBuilder {
    /// Define a property with no explicit values, defined at time zero.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::DuplicateIdentifier`] if the property is
    /// already defined.
    pub fn define(
        mut self,
        id: impl Into<PropertyId>,
        definition: PropertyDefinition,
    ) -> Result<Self, KernelError> {
        let id = id.into();
        if self.properties.contains_key(&id) {
            return Err(KernelError::duplicate("property", &id));
        }
        self.properties.insert(
            id.clone(),
            PropertySnapshot {
                id,
                definition,
                defined_at: 0.0,
                values: Vec::new(),
            },
        );
        Ok(self)
    }

    /// Produce the data.
    pub fn build(self) -> PersonPropertiesData {
        PersonPropertiesData {
            properties: self.properties.into_values().collect(),
        }
    }
}

/// A property was defined while the simulation was running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonPropertyDefinitionEvent {
    /// The new property.
    pub property: PropertyId,
}

impl Event for PersonPropertyDefinitionEvent {}

/// A person's property value changed.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonPropertyUpdateEvent {
    /// The person.
    pub person: PersonId,
    /// The property.
    pub property: PropertyId,
    /// Value before the change.
    pub previous: PropertyValue,
    /// Value after the change.
    pub current: PropertyValue,
}

impl Event for PersonPropertyUpdateEvent {}

/// Updates of `property`.
pub fn property_filter(property: &PropertyId) -> EventFilter<PersonPropertyUpdateEvent> {
    EventFilter::all().with(PROPERTY_LABELER, property.to_label())
}

/// Updates of `property` that set it to `value`.
pub fn property_value_filter(
    property: &PropertyId,
    value: &PropertyValue,
) -> EventFilter<PersonPropertyUpdateEvent> {
    EventFilter::all().with(PROPERTY_VALUE_LABELER, property_value_label(property, value))
}

fn property_value_label(property: &PropertyId, value: &PropertyValue) -> Label {
    Label::tuple([property.to_label(), value.to_label()])
}

/// Updates of any property of `person`.
pub fn person_filter(person: PersonId) -> EventFilter<PersonPropertyUpdateEvent> {
    EventFilter::all().with(PERSON_LABELER, person.to_label())
}

/// Owner of every person property.
#[derive(Debug, Default)]
pub struct PersonPropertiesDataManager {
    properties: BTreeMap<PropertyId, PropertyValues>,
}

impl PersonPropertiesDataManager {
    /// Rebuild from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::DuplicateIdentifier`] for a repeated property
    /// and [`KernelError::Property`] for values that do not fit their
    /// definition.
    pub fn from_plugin_data(data: &PersonPropertiesData) -> Result<Self, KernelError> {
        let mut properties = BTreeMap::new();
        for snapshot in &data.properties {
            let mut column = PropertyValues::new(snapshot.definition.clone(), snapshot.defined_at);
            for assigned in &snapshot.values {
                let time = assigned.time.unwrap_or(snapshot.defined_at);
                column.set(assigned.person.index(), assigned.value.clone(), time)?;
            }
            if properties.insert(snapshot.id.clone(), column).is_some() {
                return Err(KernelError::duplicate("property", &snapshot.id));
            }
        }
        Ok(Self { properties })
    }

    /// Whether `property` is defined.
    pub fn is_defined(&self, property: &PropertyId) -> bool {
        self.properties.contains_key(property)
    }

    /// Defined properties, ascending.
    pub fn property_ids(&self) -> impl Iterator<Item = &PropertyId> {
        self.properties.keys()
    }

    /// The definition of `property`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] for undefined properties.
    pub fn definition(&self, property: &PropertyId) -> Result<&PropertyDefinition, KernelError> {
        self.column(property).map(PropertyValues::definition)
    }

    /// The value of `property` for `person`.
    ///
    /// Person existence is not checked here; callers that accept arbitrary
    /// ids check it with [`PeopleDataManager::require_person`].
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] for undefined properties.
    pub fn value(
        &self,
        person: PersonId,
        property: &PropertyId,
    ) -> Result<PropertyValue, KernelError> {
        Ok(self.column(property)?.get(person.index())?)
    }

    /// Last assignment time of `property` for `person`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] for undefined properties
    /// and [`KernelError::Precondition`] if the property does not track time.
    pub fn assignment_time(
        &self,
        person: PersonId,
        property: &PropertyId,
    ) -> Result<f64, KernelError> {
        self.column(property)?
            .assignment_time(person.index())?
            .ok_or_else(|| {
                KernelError::precondition(format!("property {property} does not track time"))
            })
    }

    /// Check the values supplied with a new person: every value must match a
    /// defined property, and every property without a default must be given
    /// a value.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`],
    /// [`KernelError::IncompatibleValue`] or [`KernelError::Precondition`].
    pub fn check_initial_values(
        &self,
        values: &BTreeMap<PropertyId, PropertyValue>,
    ) -> Result<(), KernelError> {
        for (property, value) in values {
            check_type(property, self.column(property)?.definition(), value)?;
        }
        if let Some((missing, _)) = self.properties.iter().find(|(property, column)| {
            column.definition().default_value().is_none() && !values.contains_key(*property)
        }) {
            return Err(KernelError::precondition(format!(
                "property {missing} has no default and no value was supplied"
            )));
        }
        Ok(())
    }

    /// Every living person must hold an explicit value for every property
    /// without a default.
    fn check_complete(&self, people: &PeopleDataManager) -> Result<(), KernelError> {
        let required = self
            .properties
            .iter()
            .filter(|(_, column)| column.definition().default_value().is_none());
        for (property, column) in required {
            for person in people.people() {
                if !column.is_explicit(person.index())? {
                    return Err(KernelError::precondition(format!(
                        "person {person} lacks a value for {property}, which has no default"
                    )));
                }
            }
        }
        Ok(())
    }

    fn column(&self, property: &PropertyId) -> Result<&PropertyValues, KernelError> {
        self.properties
            .get(property)
            .ok_or_else(|| KernelError::unknown("property", property))
    }

    fn column_mut(
        &mut self,
        property: &PropertyId,
    ) -> Result<&mut PropertyValues, KernelError> {
        self.properties
            .get_mut(property)
            .ok_or_else(|| KernelError::unknown("property", property))
    }
}

fn check_type(
    property: &PropertyId,
    definition: &PropertyDefinition,
    value: &PropertyValue,
) -> Result<(), KernelError> {
    definition
        .check_value(value)
        .map_err(|_mismatch| KernelError::IncompatibleValue {
            property: property.to_string(),
            expected: definition.property_type(),
            actual: value.property_type(),
        })
}

impl DataManager for PersonPropertiesDataManager {
    fn name(&self) -> &'static str {
        "person_properties"
    }

    fn init(&mut self, ctx: &mut Context<'_>) -> Result<(), KernelError> {
        self.check_complete(ctx.data_manager::<PeopleDataManager>()?)?;
        ctx.add_labeler(EventLabeler::from_event(
            PROPERTY_LABELER,
            |event: &PersonPropertyUpdateEvent| event.property.to_label(),
        ))?;
        ctx.add_labeler(EventLabeler::from_event(
            PROPERTY_VALUE_LABELER,
            |event: &PersonPropertyUpdateEvent| {
                property_value_label(&event.property, &event.current)
            },
        ))?;
        ctx.add_labeler(EventLabeler::from_event(
            PERSON_LABELER,
            |event: &PersonPropertyUpdateEvent| event.person.to_label(),
        ))?;

        ctx.subscribe(EventFilter::<PersonAddedEvent>::all(), |ctx, event| {
            ctx.submit(AssignInitialValues {
                person: event.person,
                values: event.property_values.clone(),
            })
        })?;
        ctx.subscribe(EventFilter::<PersonRemovedEvent>::all(), |ctx, event| {
            ctx.submit(ForgetPerson {
                person: event.person,
            })
        })?;
        debug!(properties = self.properties.len(), "Person properties loaded");
        Ok(())
    }

    fn to_plugin_data(&self) -> Result<Option<Box<dyn PluginData>>, KernelError> {
        let mut properties = Vec::with_capacity(self.properties.len());
        for (id, column) in &self.properties {
            let mut values = Vec::new();
            for offset in column.explicit_indices() {
                let person = PersonId::new(u32::try_from(offset).map_err(|_overflow| {
                    KernelError::Internal("explicit value beyond the person id range")
                })?);
                values.push(AssignedValue {
                    person,
                    value: column.get(person.index())?,
                    time: column.assignment_time(person.index())?,
                });
            }
            properties.push(PropertySnapshot {
                id: id.clone(),
                definition: column.definition().clone(),
                defined_at: column.tracking_start().unwrap_or(0.0),
                values,
            });
        }
        Ok(Some(Box::new(PersonPropertiesData { properties })))
    }
}

/// Define a property while the simulation runs.
///
/// A property without a default needs a value for every living person.
#[derive(Debug, Clone)]
pub struct DefineProperty {
    id: PropertyId,
    definition: PropertyDefinition,
    values: BTreeMap<PersonId, PropertyValue>,
}

impl DefineProperty {
    /// Define `id` with `definition`.
    pub fn new(id: impl Into<PropertyId>, definition: PropertyDefinition) -> Self {
        Self {
            id: id.into(),
            definition,
            values: BTreeMap::new(),
        }
    }

    /// Supply the initial value for `person`.
    #[must_use]
    pub fn with_value(mut self, person: PersonId, value: impl Into<PropertyValue>) -> Self {
        self.values.insert(person, value.into());
        self
    }
}

impl Command for DefineProperty {
    type Target = PersonPropertiesDataManager;
    type Output = ();

    fn validate(
        &self,
        target: &PersonPropertiesDataManager,
        view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        if target.is_defined(&self.id) {
            return Err(KernelError::duplicate("property", &self.id));
        }
        let people = view.data_manager::<PeopleDataManager>()?;
        for (person, value) in &self.values {
            people.require_person(*person)?;
            check_type(&self.id, &self.definition, value)?;
        }
        if self.definition.default_value().is_none()
            && let Some(missing) = people.people().find(|person| !self.values.contains_key(person))
        {
            return Err(KernelError::precondition(format!(
                "property {} has no default and person {missing} has no value",
                self.id
            )));
        }
        Ok(())
    }

    fn execute(
        self,
        target: &mut PersonPropertiesDataManager,
        effects: &mut Effects<'_>,
    ) -> Result<(), KernelError> {
        let time = effects.time();
        let mut column = PropertyValues::new(self.definition, time);
        for (person, value) in self.values {
            column.set(person.index(), value, time)?;
        }
        target.properties.insert(self.id.clone(), column);
        effects.publish(PersonPropertyDefinitionEvent { property: self.id });
        Ok(())
    }
}

/// Change one person's property value.
#[derive(Debug, Clone)]
pub struct SetPersonProperty {
    /// The person.
    pub person: PersonId,
    /// The property.
    pub property: PropertyId,
    /// The new value.
    pub value: PropertyValue,
}

impl SetPersonProperty {
    /// Set `property` of `person` to `value`.
    pub fn new(
        person: PersonId,
        property: impl Into<PropertyId>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        Self {
            person,
            property: property.into(),
            value: value.into(),
        }
    }
}

impl Command for SetPersonProperty {
    type Target = PersonPropertiesDataManager;
    type Output = ();

    fn validate(
        &self,
        target: &PersonPropertiesDataManager,
        view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        view.data_manager::<PeopleDataManager>()?
            .require_person(self.person)?;
        let definition = target.definition(&self.property)?;
        if !definition.is_mutable() {
            return Err(KernelError::ImmutableProperty {
                property: self.property.to_string(),
            });
        }
        check_type(&self.property, definition, &self.value)
    }

    fn execute(
        self,
        target: &mut PersonPropertiesDataManager,
        effects: &mut Effects<'_>,
    ) -> Result<(), KernelError> {
        let time = effects.time();
        let column = target.column_mut(&self.property)?;
        let previous = column.get(self.person.index())?;
        column.set(self.person.index(), self.value.clone(), time)?;
        effects.publish(PersonPropertyUpdateEvent {
            person: self.person,
            property: self.property,
            previous,
            current: self.value,
        });
        Ok(())
    }
}

/// Record the values a person was added with. Runs from the person-added
/// handler, after the people manager validated them.
struct AssignInitialValues {
    person: PersonId,
    values: BTreeMap<PropertyId, PropertyValue>,
}

impl Command for AssignInitialValues {
    type Target = PersonPropertiesDataManager;
    type Output = ();

    fn validate(
        &self,
        target: &PersonPropertiesDataManager,
        _view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        target.check_initial_values(&self.values)
    }

    fn execute(
        self,
        target: &mut PersonPropertiesDataManager,
        effects: &mut Effects<'_>,
    ) -> Result<(), KernelError> {
        let time = effects.time();
        for (property, value) in self.values {
            target
                .column_mut(&property)?
                .set(self.person.index(), value, time)?;
        }
        Ok(())
    }
}

/// Drop a removed person's values so snapshots do not carry them.
struct ForgetPerson {
    person: PersonId,
}

impl Command for ForgetPerson {
    type Target = PersonPropertiesDataManager;
    type Output = ();

    fn validate(
        &self,
        _target: &PersonPropertiesDataManager,
        _view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        Ok(())
    }

    fn execute(
        self,
        target: &mut PersonPropertiesDataManager,
        _effects: &mut Effects<'_>,
    ) -> Result<(), KernelError> {
        for column in target.properties.values_mut() {
            column.clear(self.person.index())?;
        }
        Ok(())
    }
}

/// Build the person properties plugin.
///
/// # Errors
///
/// Propagates plugin construction errors.
pub fn plugin(data: PersonPropertiesData) -> Result<Plugin, KernelError> {
    Plugin::builder(PLUGIN_ID)
        .add_dependency(people::PLUGIN_ID)
        .add_plugin_data(data)
        .set_initializer(|ctx| {
            let data = ctx.plugin_data::<PersonPropertiesData>()?;
            ctx.add_data_manager(PersonPropertiesDataManager::from_plugin_data(data)?)
        })
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use cohort_properties::{PropertyType, TimeTrackingPolicy};

    fn data() -> PersonPropertiesData {
        PersonPropertiesData::builder()
            .define(
                "vaccinated",
                PropertyDefinition::builder(PropertyType::Boolean)
                    .default_value(false)
                    .time_tracking(TimeTrackingPolicy::TrackTime)
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .define(
                "age",
                PropertyDefinition::builder(PropertyType::Integer)
                    .mutable(false)
                    .build()
                    .unwrap(),
            )
            .unwrap()
            .build()
    }

    #[test]
    fn builder_rejects_duplicates_and_sorts() {
        let result = PersonPropertiesData::builder()
            .define("a", PropertyDefinition::builder(PropertyType::Float).build().unwrap())
            .unwrap()
            .define("a", PropertyDefinition::builder(PropertyType::Float).build().unwrap());
        assert!(matches!(result, Err(KernelError::DuplicateIdentifier { .. })));

        let data = data();
        let ids: Vec<&str> = data.properties().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["age", "vaccinated"]);
    }

    #[test]
    fn initial_values_must_cover_properties_without_defaults() {
        let manager = PersonPropertiesDataManager::from_plugin_data(&data()).unwrap();
        let mut values = BTreeMap::new();
        assert!(matches!(
            manager.check_initial_values(&values),
            Err(KernelError::Precondition { .. })
        ));
        values.insert(PropertyId::from("age"), PropertyValue::Text("old".to_owned()));
        assert!(matches!(
            manager.check_initial_values(&values),
            Err(KernelError::IncompatibleValue { .. })
        ));
        values.insert(PropertyId::from("age"), PropertyValue::Integer(40));
        manager.check_initial_values(&values).unwrap();
        values.insert(PropertyId::from("height"), PropertyValue::Float(1.8));
        assert!(matches!(
            manager.check_initial_values(&values),
            Err(KernelError::UnknownIdentifier { .. })
        ));
    }

    #[test]
    fn snapshot_keeps_explicit_values_and_times_only() {
        let mut snapshot = data();
        if let Some(vaccinated) = snapshot
            .properties
            .iter_mut()
            .find(|property| property.id.as_str() == "vaccinated")
        {
            vaccinated.values.push(AssignedValue {
                person: PersonId::new(3),
                value: PropertyValue::Boolean(true),
                time: Some(12.0),
            });
        }
        let manager = PersonPropertiesDataManager::from_plugin_data(&snapshot).unwrap();
        let vaccinated = PropertyId::from("vaccinated");
        assert_eq!(
            manager.value(PersonId::new(3), &vaccinated).unwrap(),
            PropertyValue::Boolean(true)
        );
        assert_eq!(
            manager.value(PersonId::new(4), &vaccinated).unwrap(),
            PropertyValue::Boolean(false)
        );
        assert_eq!(manager.assignment_time(PersonId::new(3), &vaccinated).unwrap(), 12.0);
        assert_eq!(manager.assignment_time(PersonId::new(4), &vaccinated).unwrap(), 0.0);
        assert!(matches!(
            manager.assignment_time(PersonId::new(3), &PropertyId::from("age")),
            Err(KernelError::Precondition { .. })
        ));

        let restored = manager.to_plugin_data().unwrap().unwrap();
        let restored = (*restored)
            .as_any()
            .downcast_ref::<PersonPropertiesData>()
            .unwrap();
        assert_eq!(restored, &snapshot);
    }
}
