//! Routing labels for the person domain.
//!
//! The kernel's [`Label`] knows only scalars and tuples. People, property
//! ids and property values are mapped onto those here.

use cohort_kernel::Label;
use cohort_properties::{PropertyId, PropertyValue};
use cohort_types::PersonId;

/// Conversion into a routing [`Label`].
pub trait ToLabel {
    /// The label this value routes under.
    fn to_label(&self) -> Label;
}

impl ToLabel for PersonId {
    fn to_label(&self) -> Label {
        Label::from(self.value())
    }
}

impl ToLabel for PropertyId {
    fn to_label(&self) -> Label {
        Label::from(self.as_str())
    }
}

impl ToLabel for PropertyValue {
    fn to_label(&self) -> Label {
        match self {
            Self::Boolean(value) => Label::from(*value),
            Self::Integer(value) => Label::from(*value),
            Self::Float(value) => Label::from(*value),
            Self::Text(value) => Label::from(value.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_of_different_types_route_apart() {
        assert_ne!(
            PropertyValue::Integer(1).to_label(),
            PropertyValue::Text("1".to_owned()).to_label()
        );
        assert_ne!(
            PropertyValue::Integer(1).to_label(),
            PropertyValue::Boolean(true).to_label()
        );
        assert_eq!(
            PropertyValue::Float(0.5).to_label(),
            PropertyValue::Float(0.5).to_label()
        );
        assert_eq!(PersonId::new(7).to_label(), Label::from(7_u32));
        assert_eq!(PropertyId::from("age").to_label(), Label::from("age"));
    }
}
