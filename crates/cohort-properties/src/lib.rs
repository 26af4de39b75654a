//! Compact, default-aware storage for per-entity property values.
//!
//! Data managers keep one value per entity per property. Entity counts can
//! reach hundreds of thousands, so the containers here are dense arrays
//! indexed by entity index, grown geometrically on demand, and (for
//! integers) stored at the narrowest element width that holds every value
//! written so far.
//!
//! # Contract
//!
//! - `get(i)` is defined for every `i >= 0`. Indices past the physical end
//!   of the backing store read as the container's default.
//! - Negative indices fail with [`PropertyError::NegativeIndex`]. That is the
//!   only validation containers perform; entity existence is the owning data
//!   manager's concern.
//!
//! # Modules
//!
//! - [`container`] -- [`ObjectContainer`], a generic default-valued array.
//! - [`int_container`] -- [`IntValueContainer`], auto-widening integer storage.
//! - [`boolean`] -- [`BooleanContainer`], a bit set with a default bit.
//! - [`definition`] -- [`PropertyDefinition`], [`PropertyValue`] and friends.
//! - [`values`] -- [`PropertyValues`], a typed column combining a container
//!   with explicit-assignment and assignment-time tracking.
//! - [`error`] -- [`PropertyError`].

pub mod boolean;
pub mod container;
pub mod definition;
pub mod error;
pub mod int_container;
pub mod values;

pub use boolean::BooleanContainer;
pub use container::ObjectContainer;
pub use definition::{
    PropertyDefinition, PropertyDefinitionBuilder, PropertyId, PropertyType, PropertyValue,
    TimeTrackingPolicy,
};
pub use error::PropertyError;
pub use int_container::{IntValueContainer, IntWidth};
pub use values::PropertyValues;

/// Convert a caller-supplied index into a storage offset.
///
/// # Errors
///
/// Returns [`PropertyError::NegativeIndex`] for negative indices and
/// [`PropertyError::CapacityOverflow`] if the index does not fit in `usize`.
pub(crate) fn offset_of(index: i64) -> Result<usize, PropertyError> {
    if index < 0 {
        return Err(PropertyError::NegativeIndex(index));
    }
    usize::try_from(index).map_err(|_err| PropertyError::CapacityOverflow(index))
}

/// Physical length after growing to hold at least `required` slots.
///
/// Growth is geometric: the new length is the larger of `required` and
/// 1.25 times the current length.
pub(crate) fn grown_len(current: usize, required: usize) -> usize {
    required.max(current.saturating_add(current / 4))
}
