//! Typed property columns.
//!
//! A [`PropertyValues`] column holds one property's values for every
//! entity. Besides the values it records which entities were explicitly
//! assigned (so a snapshot can distinguish "never set, reads as default"
//! from "set to a value equal to the default") and, when the definition
//! asks for it, the simulation time of each entity's last assignment.

use crate::{
    BooleanContainer, IntValueContainer, ObjectContainer, PropertyDefinition, PropertyError,
    PropertyType, PropertyValue, offset_of,
};

#[derive(Debug, Clone, PartialEq)]
enum ColumnStore {
    Boolean(BooleanContainer),
    Integer(IntValueContainer),
    Float(ObjectContainer<f64>),
    Text(ObjectContainer<String>),
}

impl ColumnStore {
    fn for_default(default: &PropertyValue) -> Self {
        match default {
            PropertyValue::Boolean(value) => Self::Boolean(BooleanContainer::new(*value)),
            PropertyValue::Integer(value) => Self::Integer(IntValueContainer::new(*value)),
            PropertyValue::Float(value) => Self::Float(ObjectContainer::new(*value)),
            PropertyValue::Text(value) => Self::Text(ObjectContainer::new(value.clone())),
        }
    }

    fn get(&self, index: i64) -> Result<PropertyValue, PropertyError> {
        Ok(match self {
            Self::Boolean(values) => PropertyValue::Boolean(values.get(index)?),
            Self::Integer(values) => PropertyValue::Integer(values.get(index)?),
            Self::Float(values) => PropertyValue::Float(values.get(index)?),
            Self::Text(values) => PropertyValue::Text(values.get(index)?),
        })
    }

    fn set(&mut self, index: i64, value: PropertyValue) -> Result<(), PropertyError> {
        match (self, value) {
            (Self::Boolean(values), PropertyValue::Boolean(value)) => values.set(index, value),
            (Self::Integer(values), PropertyValue::Integer(value)) => values.set(index, value),
            (Self::Float(values), PropertyValue::Float(value)) => values.set(index, value),
            (Self::Text(values), PropertyValue::Text(value)) => values.set(index, value),
            (store, value) => Err(PropertyError::IncompatibleValue {
                expected: store.property_type(),
                actual: value.property_type(),
            }),
        }
    }

    fn default_value(&self) -> PropertyValue {
        match self {
            Self::Boolean(values) => PropertyValue::Boolean(values.default_value()),
            Self::Integer(values) => PropertyValue::Integer(values.default_value()),
            Self::Float(values) => PropertyValue::Float(*values.default_value()),
            Self::Text(values) => PropertyValue::Text(values.default_value().clone()),
        }
    }

    const fn property_type(&self) -> PropertyType {
        match self {
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Integer(_) => PropertyType::Integer,
            Self::Float(_) => PropertyType::Float,
            Self::Text(_) => PropertyType::Text,
        }
    }
}

/// One property's values for all entities.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValues {
    definition: PropertyDefinition,
    store: ColumnStore,
    /// Entities whose value was explicitly assigned.
    explicit: BooleanContainer,
    /// Last assignment time per entity, when the definition tracks time.
    assignment_times: Option<ObjectContainer<f64>>,
}

impl PropertyValues {
    /// Create an empty column.
    ///
    /// `tracking_start` is the assignment time reported for entities that
    /// were never explicitly assigned; it is normally the time at which the
    /// property was defined.
    pub fn new(definition: PropertyDefinition, tracking_start: f64) -> Self {
        let fill = definition
            .default_value()
            .cloned()
            .unwrap_or_else(|| PropertyValue::zero(definition.property_type()));
        let assignment_times = definition
            .tracks_time()
            .then(|| ObjectContainer::new(tracking_start));
        Self {
            store: ColumnStore::for_default(&fill),
            definition,
            explicit: BooleanContainer::new(false),
            assignment_times,
        }
    }

    /// The property's definition.
    pub const fn definition(&self) -> &PropertyDefinition {
        &self.definition
    }

    /// Return the value for `index`.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] for negative indices, or
    /// [`PropertyError::UnsetValue`] if the property has no default and the
    /// index was never assigned.
    pub fn get(&self, index: i64) -> Result<PropertyValue, PropertyError> {
        if !self.explicit.get(index)? && self.definition.default_value().is_none() {
            return Err(PropertyError::UnsetValue(index));
        }
        self.store.get(index)
    }

    /// Whether `index` was explicitly assigned.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] for negative indices.
    pub fn is_explicit(&self, index: i64) -> Result<bool, PropertyError> {
        self.explicit.get(index)
    }

    /// Assign `value` to `index` at simulation time `time`.
    ///
    /// Mutability is not checked here: initial assignment of an immutable
    /// property goes through this method too. The owning data manager
    /// decides when an assignment is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] for negative indices or
    /// [`PropertyError::IncompatibleValue`] on a type mismatch. Nothing is
    /// modified on error.
    pub fn set(
        &mut self,
        index: i64,
        value: PropertyValue,
        time: f64,
    ) -> Result<(), PropertyError> {
        offset_of(index)?;
        self.definition.check_value(&value)?;
        self.store.set(index, value)?;
        self.explicit.set(index, true)?;
        if let Some(times) = self.assignment_times.as_mut() {
            times.set(index, time)?;
        }
        Ok(())
    }

    /// Return `index` to the never-assigned state.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] for negative indices.
    pub fn clear(&mut self, index: i64) -> Result<(), PropertyError> {
        offset_of(index)?;
        if !self.explicit.get(index)? {
            return Ok(());
        }
        let fill = self.store.default_value();
        self.store.set(index, fill)?;
        self.explicit.set(index, false)?;
        if let Some(times) = self.assignment_times.as_mut() {
            let start = *times.default_value();
            times.set(index, start)?;
        }
        Ok(())
    }

    /// Last assignment time of `index`, or `None` if time is not tracked.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] for negative indices.
    pub fn assignment_time(&self, index: i64) -> Result<Option<f64>, PropertyError> {
        self.assignment_times
            .as_ref()
            .map(|times| times.get(index))
            .transpose()
    }

    /// Restore an assignment time recorded in a snapshot.
    ///
    /// Does nothing for properties that do not track time.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] for negative indices.
    pub fn restore_assignment_time(
        &mut self,
        index: i64,
        time: f64,
    ) -> Result<(), PropertyError> {
        match self.assignment_times.as_mut() {
            Some(times) => times.set(index, time),
            None => offset_of(index).map(|_| ()),
        }
    }

    /// The assignment time reported for never-assigned entities, if time is
    /// tracked.
    pub fn tracking_start(&self) -> Option<f64> {
        self.assignment_times
            .as_ref()
            .map(|times| *times.default_value())
    }

    /// Indices that were explicitly assigned, ascending.
    pub fn explicit_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.explicit.iter_true()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::TimeTrackingPolicy;

    fn counter() -> PropertyValues {
        let definition = PropertyDefinition::builder(PropertyType::Integer)
            .default_value(0_i64)
            .time_tracking(TimeTrackingPolicy::TrackTime)
            .build()
            .unwrap();
        PropertyValues::new(definition, 1.5)
    }

    #[test]
    fn defaulted_column_reads_default_and_start_time() {
        let column = counter();
        assert_eq!(column.get(10_000).unwrap(), PropertyValue::Integer(0));
        assert_eq!(column.assignment_time(10_000).unwrap(), Some(1.5));
        assert!(!column.is_explicit(3).unwrap());
    }

    #[test]
    fn set_records_value_explicitness_and_time() {
        let mut column = counter();
        column.set(3, PropertyValue::Integer(0), 4.0).unwrap();
        assert!(column.is_explicit(3).unwrap());
        assert_eq!(column.assignment_time(3).unwrap(), Some(4.0));
        assert_eq!(column.explicit_indices().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn incompatible_value_leaves_column_unchanged() {
        let mut column = counter();
        let before = column.clone();
        let result = column.set(2, PropertyValue::Text("x".to_owned()), 2.0);
        assert_eq!(
            result,
            Err(PropertyError::IncompatibleValue {
                expected: PropertyType::Integer,
                actual: PropertyType::Text,
            })
        );
        assert_eq!(column, before);
    }

    #[test]
    fn column_without_default_refuses_unset_reads() {
        let definition = PropertyDefinition::builder(PropertyType::Text)
            .build()
            .unwrap();
        let mut column = PropertyValues::new(definition, 0.0);
        assert_eq!(column.get(0), Err(PropertyError::UnsetValue(0)));
        column.set(0, PropertyValue::from("north"), 0.0).unwrap();
        assert_eq!(column.get(0).unwrap(), PropertyValue::from("north"));
        assert_eq!(column.assignment_time(0).unwrap(), None);
    }

    #[test]
    fn clear_returns_index_to_default_state() {
        let mut column = counter();
        column.set(7, PropertyValue::Integer(90), 3.0).unwrap();
        column.clear(7).unwrap();
        assert_eq!(column.get(7).unwrap(), PropertyValue::Integer(0));
        assert!(!column.is_explicit(7).unwrap());
        assert_eq!(column.assignment_time(7).unwrap(), Some(1.5));
    }

    #[test]
    fn negative_index_is_rejected() {
        let mut column = counter();
        assert_eq!(column.get(-1), Err(PropertyError::NegativeIndex(-1)));
        assert_eq!(
            column.set(-1, PropertyValue::Integer(1), 0.0),
            Err(PropertyError::NegativeIndex(-1))
        );
    }
}
