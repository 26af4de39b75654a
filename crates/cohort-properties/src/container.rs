//! Generic default-valued indexed storage.

use crate::{PropertyError, grown_len, offset_of};

/// Maps non-negative indices to values, reading unset indices as a default.
///
/// The backing vector is the container's physical capacity. Slots are
/// back-filled with the default when the vector grows, so a value read as
/// the default before growth is still the default afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectContainer<T> {
    /// Value returned for every index never set.
    default: T,
    /// Physical slots, each either the default or an explicitly set value.
    values: Vec<T>,
}

impl<T: Clone> ObjectContainer<T> {
    /// Create an empty container with the given default.
    pub const fn new(default: T) -> Self {
        Self {
            default,
            values: Vec::new(),
        }
    }

    /// Create a container with `capacity` default-valued slots allocated.
    pub fn with_capacity(default: T, capacity: usize) -> Self {
        let mut container = Self::new(default);
        container.expand_capacity(capacity);
        container
    }

    /// Return the value at `index`, or the default if it was never set.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] if `index < 0`.
    pub fn get(&self, index: i64) -> Result<T, PropertyError> {
        self.get_ref(index).cloned()
    }

    /// Borrow the value at `index`, or the default if it was never set.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] if `index < 0`.
    pub fn get_ref(&self, index: i64) -> Result<&T, PropertyError> {
        let offset = offset_of(index)?;
        Ok(self.values.get(offset).unwrap_or(&self.default))
    }

    /// Store `value` at `index`, growing the backing store if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] if `index < 0`.
    pub fn set(&mut self, index: i64, value: T) -> Result<(), PropertyError> {
        let offset = offset_of(index)?;
        self.ensure_slot(offset);
        if let Some(slot) = self.values.get_mut(offset) {
            *slot = value;
        }
        Ok(())
    }

    /// Ensure at least `capacity` physical slots exist.
    pub fn expand_capacity(&mut self, capacity: usize) {
        if capacity > self.values.len() {
            self.values.resize(capacity, self.default.clone());
        }
    }

    /// Number of physical slots currently allocated.
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// The value returned for unset indices.
    pub const fn default_value(&self) -> &T {
        &self.default
    }

    fn ensure_slot(&mut self, offset: usize) {
        if offset >= self.values.len() {
            let required = offset.saturating_add(1);
            let target = grown_len(self.values.len(), required);
            self.values.resize(target, self.default.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn unset_indices_read_as_default() {
        let container = ObjectContainer::new(String::from("none"));
        assert_eq!(container.get(0).unwrap(), "none");
        assert_eq!(container.get(10_000).unwrap(), "none");
        assert_eq!(container.capacity(), 0);
    }

    #[test]
    fn set_is_visible_and_neighbours_keep_default() {
        let mut container = ObjectContainer::new(7_u8);
        container.set(5, 42).unwrap();
        assert_eq!(container.get(5).unwrap(), 42);
        assert_eq!(container.get(6).unwrap(), 7);
        assert_eq!(container.get(4).unwrap(), 7);
    }

    #[test]
    fn growth_is_geometric() {
        let mut container = ObjectContainer::with_capacity(0_i32, 100);
        container.set(100, 1).unwrap();
        assert_eq!(container.capacity(), 125);
        container.set(1_000, 1).unwrap();
        assert_eq!(container.capacity(), 1_001);
    }

    #[test]
    fn defaults_are_stable_across_growth() {
        let mut container = ObjectContainer::new(-1_i64);
        let before = container.get(50).unwrap();
        container.set(60, 3).unwrap();
        assert_eq!(container.get(50).unwrap(), before);
    }

    #[test]
    fn negative_index_fails_without_mutation() {
        let mut container = ObjectContainer::new(0_i32);
        assert_eq!(container.set(-1, 9), Err(PropertyError::NegativeIndex(-1)));
        assert_eq!(container.get(-1), Err(PropertyError::NegativeIndex(-1)));
        assert_eq!(container.capacity(), 0);
    }

    #[test]
    fn expand_capacity_never_shrinks() {
        let mut container = ObjectContainer::with_capacity(false, 10);
        container.expand_capacity(4);
        assert_eq!(container.capacity(), 10);
    }
}
