//! Error types for the `cohort-properties` crate.

use crate::definition::PropertyType;
use crate::int_container::IntWidth;

/// Errors raised by property containers and property definitions.
///
/// Every check happens before a container is touched, so a failed call
/// leaves the container unchanged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    /// A negative entity index was supplied.
    #[error("index negative: {0}")]
    NegativeIndex(i64),

    /// The index cannot be addressed on this platform.
    #[error("index {0} exceeds addressable capacity")]
    CapacityOverflow(i64),

    /// A value's type does not match the property's declared type.
    #[error("incompatible value: expected {expected}, got {actual}")]
    IncompatibleValue {
        /// The declared property type.
        expected: PropertyType,
        /// The type of the supplied value.
        actual: PropertyType,
    },

    /// A property without a default was read for an index never assigned.
    #[error("no value assigned at index {0} and the property has no default")]
    UnsetValue(i64),

    /// An integer did not fit the storage width after promotion.
    #[error("value {value} does not fit {width:?} storage")]
    ValueOutOfRange {
        /// The value being stored.
        value: i64,
        /// The storage width in effect.
        width: IntWidth,
    },
}
