//! Integer storage that widens its element type on demand.
//!
//! Most per-entity integers (ages, counters, small enumerations) fit in a
//! byte. [`IntValueContainer`] starts at the narrowest width that holds its
//! default and promotes the whole backing array the first time a value
//! outside the current range is stored: byte, then short, then int, then
//! long. Promotion widens every stored element losslessly and never
//! narrows again.

use serde::{Deserialize, Serialize};

use crate::{PropertyError, grown_len, offset_of};

/// Element width of an [`IntValueContainer`]'s backing array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntWidth {
    /// 8-bit signed storage.
    Byte,
    /// 16-bit signed storage.
    Short,
    /// 32-bit signed storage.
    Int,
    /// 64-bit signed storage.
    Long,
}

impl IntWidth {
    /// The narrowest width that can hold `value`.
    pub fn for_value(value: i64) -> Self {
        if i8::try_from(value).is_ok() {
            Self::Byte
        } else if i16::try_from(value).is_ok() {
            Self::Short
        } else if i32::try_from(value).is_ok() {
            Self::Int
        } else {
            Self::Long
        }
    }

    /// Number of bits per stored element.
    pub const fn bits(self) -> u32 {
        match self {
            Self::Byte => 8,
            Self::Short => 16,
            Self::Int => 32,
            Self::Long => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IntStore {
    Byte(Vec<i8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
}

fn widen<S: Copy, D: From<S>>(values: &[S]) -> Vec<D> {
    values.iter().map(|&v| D::from(v)).collect()
}

fn resize_with<T: Clone>(values: &mut Vec<T>, len: usize, fill: T) {
    if len > values.len() {
        values.resize(len, fill);
    }
}

impl IntStore {
    fn empty(width: IntWidth) -> Self {
        match width {
            IntWidth::Byte => Self::Byte(Vec::new()),
            IntWidth::Short => Self::Short(Vec::new()),
            IntWidth::Int => Self::Int(Vec::new()),
            IntWidth::Long => Self::Long(Vec::new()),
        }
    }

    const fn width(&self) -> IntWidth {
        match self {
            Self::Byte(_) => IntWidth::Byte,
            Self::Short(_) => IntWidth::Short,
            Self::Int(_) => IntWidth::Int,
            Self::Long(_) => IntWidth::Long,
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Byte(v) => v.len(),
            Self::Short(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Long(v) => v.len(),
        }
    }

    fn get(&self, offset: usize) -> Option<i64> {
        match self {
            Self::Byte(v) => v.get(offset).map(|&x| i64::from(x)),
            Self::Short(v) => v.get(offset).map(|&x| i64::from(x)),
            Self::Int(v) => v.get(offset).map(|&x| i64::from(x)),
            Self::Long(v) => v.get(offset).copied(),
        }
    }

    /// Copy into a wider store. Returns an unchanged copy when `width` is not
    /// wider than the current width.
    fn promoted(&self, width: IntWidth) -> Self {
        match (self, width) {
            (Self::Byte(v), IntWidth::Short) => Self::Short(widen(v)),
            (Self::Byte(v), IntWidth::Int) => Self::Int(widen(v)),
            (Self::Byte(v), IntWidth::Long) => Self::Long(widen(v)),
            (Self::Short(v), IntWidth::Int) => Self::Int(widen(v)),
            (Self::Short(v), IntWidth::Long) => Self::Long(widen(v)),
            (Self::Int(v), IntWidth::Long) => Self::Long(widen(v)),
            (store, _) => store.clone(),
        }
    }

    /// Grow to `len` slots, filling with `fill`. `fill` must fit the width.
    fn resize(&mut self, len: usize, fill: i64) -> Result<(), PropertyError> {
        let width = self.width();
        let out_of_range = || PropertyError::ValueOutOfRange { value: fill, width };
        match self {
            Self::Byte(v) => {
                resize_with(v, len, i8::try_from(fill).map_err(|_err| out_of_range())?);
            }
            Self::Short(v) => {
                resize_with(v, len, i16::try_from(fill).map_err(|_err| out_of_range())?);
            }
            Self::Int(v) => {
                resize_with(v, len, i32::try_from(fill).map_err(|_err| out_of_range())?);
            }
            Self::Long(v) => resize_with(v, len, fill),
        }
        Ok(())
    }

    fn put(&mut self, offset: usize, value: i64) -> Result<(), PropertyError> {
        let width = self.width();
        let out_of_range = || PropertyError::ValueOutOfRange { value, width };
        match self {
            Self::Byte(v) => {
                if let Some(slot) = v.get_mut(offset) {
                    *slot = i8::try_from(value).map_err(|_err| out_of_range())?;
                }
            }
            Self::Short(v) => {
                if let Some(slot) = v.get_mut(offset) {
                    *slot = i16::try_from(value).map_err(|_err| out_of_range())?;
                }
            }
            Self::Int(v) => {
                if let Some(slot) = v.get_mut(offset) {
                    *slot = i32::try_from(value).map_err(|_err| out_of_range())?;
                }
            }
            Self::Long(v) => {
                if let Some(slot) = v.get_mut(offset) {
                    *slot = value;
                }
            }
        }
        Ok(())
    }
}

/// Default-valued integer storage with automatic width promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntValueContainer {
    /// Value returned for every index never set.
    default: i64,
    /// Backing array at the current width.
    store: IntStore,
}

impl IntValueContainer {
    /// Create an empty container whose width is the narrowest that holds
    /// `default`.
    pub fn new(default: i64) -> Self {
        Self {
            default,
            store: IntStore::empty(IntWidth::for_value(default)),
        }
    }

    /// Return the value at `index`, or the default if it was never set.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] if `index < 0`.
    pub fn get(&self, index: i64) -> Result<i64, PropertyError> {
        let offset = offset_of(index)?;
        Ok(self.store.get(offset).unwrap_or(self.default))
    }

    /// Store `value` at `index`, promoting the element width first if the
    /// value does not fit.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] if `index < 0`.
    pub fn set(&mut self, index: i64, value: i64) -> Result<(), PropertyError> {
        let offset = offset_of(index)?;
        let required = IntWidth::for_value(value);
        if required > self.store.width() {
            self.store = self.store.promoted(required);
        }
        if offset >= self.store.len() {
            let target = grown_len(self.store.len(), offset.saturating_add(1));
            self.store.resize(target, self.default)?;
        }
        self.store.put(offset, value)
    }

    /// Ensure at least `capacity` physical slots exist.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the default always fits the current width.
    pub fn expand_capacity(&mut self, capacity: usize) -> Result<(), PropertyError> {
        self.store.resize(capacity, self.default)
    }

    /// Current element width of the backing array.
    pub const fn width(&self) -> IntWidth {
        self.store.width()
    }

    /// Number of physical slots currently allocated.
    pub fn capacity(&self) -> usize {
        self.store.len()
    }

    /// The value returned for unset indices.
    pub const fn default_value(&self) -> i64 {
        self.default
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_narrowest_width_for_default() {
        assert_eq!(IntValueContainer::new(0).width(), IntWidth::Byte);
        assert_eq!(IntValueContainer::new(1_000).width(), IntWidth::Short);
        assert_eq!(IntValueContainer::new(-70_000).width(), IntWidth::Int);
        assert_eq!(IntValueContainer::new(i64::MAX).width(), IntWidth::Long);
    }

    #[test]
    fn promotes_on_first_out_of_range_store() {
        let mut container = IntValueContainer::new(0);
        container.set(0, 1).unwrap();
        container.set(1, 2).unwrap();
        assert_eq!(container.width(), IntWidth::Byte);
        assert_eq!(container.get(0).unwrap(), 1);
        assert_eq!(container.get(1).unwrap(), 2);

        container.set(2, 300).unwrap();
        assert!(container.width() >= IntWidth::Short);
        assert_eq!(container.get(0).unwrap(), 1);
        assert_eq!(container.get(1).unwrap(), 2);
        assert_eq!(container.get(2).unwrap(), 300);
    }

    #[test]
    fn promotion_preserves_every_value_up_to_long() {
        let mut container = IntValueContainer::new(-3);
        for i in 0..50_i64 {
            container.set(i, i - 25).unwrap();
        }
        container.set(50, i64::from(i32::MAX) + 1).unwrap();
        assert_eq!(container.width(), IntWidth::Long);
        for i in 0..50_i64 {
            assert_eq!(container.get(i).unwrap(), i - 25);
        }
        assert_eq!(container.get(10_000).unwrap(), -3);
    }

    #[test]
    fn width_never_narrows() {
        let mut container = IntValueContainer::new(0);
        container.set(0, 40_000).unwrap();
        container.set(0, 1).unwrap();
        assert_eq!(container.width(), IntWidth::Int);
        assert_eq!(container.get(0).unwrap(), 1);
    }

    #[test]
    fn negative_index_is_rejected() {
        let mut container = IntValueContainer::new(0);
        assert_eq!(container.set(-1, 300), Err(PropertyError::NegativeIndex(-1)));
        assert_eq!(container.get(-1), Err(PropertyError::NegativeIndex(-1)));
        assert_eq!(container.width(), IntWidth::Byte);
        assert_eq!(container.capacity(), 0);
    }

    #[test]
    fn unset_indices_read_as_default_far_beyond_capacity() {
        let mut container = IntValueContainer::new(12);
        container.set(3, 4).unwrap();
        assert_eq!(container.get(10_000).unwrap(), 12);
        assert_eq!(container.get(2).unwrap(), 12);
    }
}
