//! Property definitions and dynamically typed property values.

use serde::{Deserialize, Serialize};

use crate::PropertyError;

/// Identifier of an entity-keyed property.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(String);

impl PropertyId {
    /// Create a property id from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the property name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropertyId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

/// The value type a property stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// `true`/`false`, stored in a bit set.
    Boolean,
    /// Signed integers, stored at the narrowest sufficient width.
    Integer,
    /// 64-bit floating point.
    Float,
    /// UTF-8 text.
    Text,
}

impl core::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// A property value of any supported type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// A boolean value.
    Boolean(bool),
    /// An integer value.
    Integer(i64),
    /// A floating point value.
    Float(f64),
    /// A text value.
    Text(String),
}

impl PropertyValue {
    /// The type of this value.
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::Boolean(_) => PropertyType::Boolean,
            Self::Integer(_) => PropertyType::Integer,
            Self::Float(_) => PropertyType::Float,
            Self::Text(_) => PropertyType::Text,
        }
    }

    /// Return the boolean, if this is a boolean value.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Return the integer, if this is an integer value.
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Return the float, if this is a float value.
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Return the text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// The zero value of a type, used to fill slots of properties that have
    /// no declared default.
    pub const fn zero(property_type: PropertyType) -> Self {
        match property_type {
            PropertyType::Boolean => Self::Boolean(false),
            PropertyType::Integer => Self::Integer(0),
            PropertyType::Float => Self::Float(0.0),
            PropertyType::Text => Self::Text(String::new()),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Whether a property records the simulation time of each assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeTrackingPolicy {
    /// Assignment times are not recorded.
    #[default]
    DoNotTrackTime,
    /// The last assignment time is recorded per entity.
    TrackTime,
}

/// Schema for an entity-keyed property.
///
/// A property without a default value requires an explicit value for every
/// entity that can observe it; the owning data manager enforces that when
/// entities are added or the property is defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    property_type: PropertyType,
    default_value: Option<PropertyValue>,
    mutable: bool,
    time_tracking: TimeTrackingPolicy,
}

impl PropertyDefinition {
    /// Start building a definition for a property of the given type.
    pub const fn builder(property_type: PropertyType) -> PropertyDefinitionBuilder {
        PropertyDefinitionBuilder {
            property_type,
            default_value: None,
            mutable: true,
            time_tracking: TimeTrackingPolicy::DoNotTrackTime,
        }
    }

    /// The value type of the property.
    pub const fn property_type(&self) -> PropertyType {
        self.property_type
    }

    /// The declared default, if any.
    pub const fn default_value(&self) -> Option<&PropertyValue> {
        self.default_value.as_ref()
    }

    /// Whether values may change after they are first assigned.
    pub const fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// The time-tracking policy.
    pub const fn time_tracking(&self) -> TimeTrackingPolicy {
        self.time_tracking
    }

    /// Whether assignment times are recorded.
    pub fn tracks_time(&self) -> bool {
        self.time_tracking == TimeTrackingPolicy::TrackTime
    }

    /// Check that `value` has this property's type.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::IncompatibleValue`] on a type mismatch.
    pub fn check_value(&self, value: &PropertyValue) -> Result<(), PropertyError> {
        let actual = value.property_type();
        if actual == self.property_type {
            Ok(())
        } else {
            Err(PropertyError::IncompatibleValue {
                expected: self.property_type,
                actual,
            })
        }
    }
}

/// Builder for [`PropertyDefinition`]. Consumed by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PropertyDefinitionBuilder {
    property_type: PropertyType,
    default_value: Option<PropertyValue>,
    mutable: bool,
    time_tracking: TimeTrackingPolicy,
}

impl PropertyDefinitionBuilder {
    /// Set the default value.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<PropertyValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Set whether the property may be changed after first assignment.
    #[must_use]
    pub const fn mutable(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    /// Set the time-tracking policy.
    #[must_use]
    pub const fn time_tracking(mut self, policy: TimeTrackingPolicy) -> Self {
        self.time_tracking = policy;
        self
    }

    /// Validate and produce the definition.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::IncompatibleValue`] if the default value's
    /// type does not match the property type.
    pub fn build(self) -> Result<PropertyDefinition, PropertyError> {
        let definition = PropertyDefinition {
            property_type: self.property_type,
            default_value: self.default_value,
            mutable: self.mutable,
            time_tracking: self.time_tracking,
        };
        if let Some(default) = definition.default_value() {
            definition.check_value(default)?;
        }
        Ok(definition)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_mutable_untracked() {
        let definition = PropertyDefinition::builder(PropertyType::Integer)
            .build()
            .unwrap();
        assert!(definition.is_mutable());
        assert!(!definition.tracks_time());
        assert_eq!(definition.default_value(), None);
    }

    #[test]
    fn mismatched_default_is_rejected() {
        let result = PropertyDefinition::builder(PropertyType::Boolean)
            .default_value(3_i64)
            .build();
        assert_eq!(
            result.err(),
            Some(PropertyError::IncompatibleValue {
                expected: PropertyType::Boolean,
                actual: PropertyType::Integer,
            })
        );
    }

    #[test]
    fn values_serialize_with_type_tags() {
        let json = serde_json::to_string(&PropertyValue::Integer(4)).ok();
        assert_eq!(json.as_deref(), Some(r#"{"type":"integer","value":4}"#));
    }
}
