//! Bit-packed boolean storage.

use crate::{PropertyError, grown_len, offset_of};

const WORD_BITS: usize = 64;

/// A bit set mapping non-negative indices to booleans, with a default bit
/// for indices never set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanContainer {
    /// Value returned for every index never set.
    default: bool,
    /// Backing words; newly allocated words are filled with the default bit.
    words: Vec<u64>,
}

fn locate(offset: usize) -> (usize, u64) {
    let word = offset / WORD_BITS;
    let bit = u32::try_from(offset % WORD_BITS).unwrap_or(0);
    (word, 1_u64.checked_shl(bit).unwrap_or(0))
}

impl BooleanContainer {
    /// Create an empty container with the given default.
    pub const fn new(default: bool) -> Self {
        Self {
            default,
            words: Vec::new(),
        }
    }

    /// Return the bit at `index`, or the default if it was never set.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] if `index < 0`.
    pub fn get(&self, index: i64) -> Result<bool, PropertyError> {
        let (word, mask) = locate(offset_of(index)?);
        Ok(self
            .words
            .get(word)
            .map_or(self.default, |bits| bits & mask != 0))
    }

    /// Store `value` at `index`, growing the backing words if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::NegativeIndex`] if `index < 0`.
    pub fn set(&mut self, index: i64, value: bool) -> Result<(), PropertyError> {
        let (word, mask) = locate(offset_of(index)?);
        if word >= self.words.len() {
            let target = grown_len(self.words.len(), word.saturating_add(1));
            self.words.resize(target, self.fill_word());
        }
        if let Some(bits) = self.words.get_mut(word) {
            if value {
                *bits |= mask;
            } else {
                *bits &= !mask;
            }
        }
        Ok(())
    }

    /// Ensure at least `capacity` bits are physically allocated.
    pub fn expand_capacity(&mut self, capacity: usize) {
        let words = capacity.div_ceil(WORD_BITS);
        if words > self.words.len() {
            self.words.resize(words, self.fill_word());
        }
    }

    /// Number of bits physically allocated.
    pub fn capacity(&self) -> usize {
        self.words.len().saturating_mul(WORD_BITS)
    }

    /// The value returned for unset indices.
    pub const fn default_value(&self) -> bool {
        self.default
    }

    /// Indices below the physical capacity whose bit is `true`, ascending.
    ///
    /// With a `true` default this includes allocated slots never written.
    pub fn iter_true(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, &bits)| {
            (0..WORD_BITS).filter_map(move |bit| {
                let mask = 1_u64.checked_shl(u32::try_from(bit).unwrap_or(0)).unwrap_or(0);
                (bits & mask != 0)
                    .then(|| word_index.saturating_mul(WORD_BITS).saturating_add(bit))
            })
        })
    }

    /// Number of allocated bits that are `true`.
    pub fn count_true(&self) -> usize {
        self.words
            .iter()
            .map(|bits| usize::try_from(bits.count_ones()).unwrap_or(0))
            .sum()
    }

    const fn fill_word(&self) -> u64 {
        if self.default { u64::MAX } else { 0 }
    }
}
