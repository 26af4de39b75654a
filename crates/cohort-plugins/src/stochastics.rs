//! Snapshot-able random number generation.
//!
//! One ChaCha8 stream serves the whole simulation. Drawing from it mutates
//! the stream position, so every draw is a [`Draw`] command routed through
//! the data manager protocol like any other state change. The plugin data
//! records the seed and the exact word position, which is enough to resume
//! the stream mid-run.

use cohort_kernel::{
    Command, Context, DataManager, DataView, Effects, KernelError, Plugin, PluginData,
};
use cohort_types::{PluginId, SemanticVersion};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Plugin id of the stochastics plugin.
pub const PLUGIN_ID: &str = "stochastics";

/// Current version of [`StochasticsData`].
pub const VERSION: SemanticVersion = SemanticVersion::new(1, 0, 0);

/// Seed and stream position of the simulation's random number generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StochasticsData {
    seed: [u8; 32],
    #[serde(with = "word_position")]
    word_position: u128,
}

impl StochasticsData {
    /// Start building stochastics data.
    pub const fn builder() -> StochasticsDataBuilder {
        StochasticsDataBuilder {
            seed: [0; 32],
            word_position: 0,
        }
    }

    /// The full 256-bit seed.
    pub const fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    /// Number of 32-bit words consumed from the stream.
    pub const fn word_position(&self) -> u128 {
        self.word_position
    }

    fn generator(&self) -> ChaCha8Rng {
        let mut generator = ChaCha8Rng::from_seed(self.seed);
        generator.set_word_pos(self.word_position);
        generator
    }
}

impl PluginData for StochasticsData {
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

/// Builder for [`StochasticsData`]. Consumed by [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct StochasticsDataBuilder {
    seed: [u8; 32],
    word_position: u128,
}

impl StochasticsDataBuilder {
    /// Derive the 256-bit seed from a 64-bit one.
    #[must_use]
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = ChaCha8Rng::seed_from_u64(seed).get_seed();
        self
    }

    /// Use a full 256-bit seed.
    #[must_use]
    pub const fn set_seed_bytes(mut self, seed: [u8; 32]) -> Self {
        self.seed = seed;
        self
    }

    /// Start the stream `word_position` words in.
    #[must_use]
    pub const fn set_word_position(mut self, word_position: u128) -> Self {
        self.word_position = word_position;
        self
    }

    /// Produce the data.
    pub const fn build(self) -> StochasticsData {
        StochasticsData {
            seed: self.seed,
            word_position: self.word_position,
        }
    }
}

/// The `u128` word position does not fit a JSON number, so it is written as
/// a decimal string.
mod word_position {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &u128, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<u128, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Owner of the simulation's random number generator.
#[derive(Debug)]
pub struct StochasticsDataManager {
    generator: ChaCha8Rng,
}

impl StochasticsDataManager {
    /// Rebuild the generator at the recorded stream position.
    pub fn from_plugin_data(data: &StochasticsData) -> Self {
        Self {
            generator: data.generator(),
        }
    }

    /// Number of 32-bit words consumed so far.
    pub fn word_position(&self) -> u128 {
        self.generator.get_word_pos()
    }
}

impl DataManager for StochasticsDataManager {
    fn name(&self) -> &'static str {
        "stochastics"
    }

    fn to_plugin_data(&self) -> Result<Option<Box<dyn PluginData>>, KernelError> {
        Ok(Some(Box::new(StochasticsData {
            seed: self.generator.get_seed(),
            word_position: self.generator.get_word_pos(),
        })))
    }
}

/// Draw from the generator with `sampler`.
///
/// # Examples
///
/// ```ignore
/// let roll: f64 = ctx.submit(Draw::new(|rng| rng.random()))?;
/// ```
pub struct Draw<F> {
    sampler: F,
}

impl<F> Draw<F> {
    /// Wrap a sampling function.
    pub const fn new(sampler: F) -> Self {
        Self { sampler }
    }
}

impl<F, T> Command for Draw<F>
where
    F: FnOnce(&mut ChaCha8Rng) -> T,
{
    type Target = StochasticsDataManager;
    type Output = T;

    fn validate(
        &self,
        _target: &StochasticsDataManager,
        _view: &DataView<'_>,
    ) -> Result<(), KernelError> {
        Ok(())
    }

    fn execute(
        self,
        target: &mut StochasticsDataManager,
        _effects: &mut Effects<'_>,
    ) -> Result<T, KernelError> {
        Ok((self.sampler)(&mut target.generator))
    }
}

/// Submit a [`Draw`] through `ctx`.
///
/// # Errors
///
/// Returns [`KernelError::UnknownIdentifier`] if the stochastics plugin is
/// not part of the simulation.
pub fn draw<T>(
    ctx: &mut Context<'_>,
    sampler: impl FnOnce(&mut ChaCha8Rng) -> T,
) -> Result<T, KernelError> {
    ctx.submit(Draw::new(sampler))
}

/// Build the stochastics plugin.
///
/// # Errors
///
/// Propagates plugin construction errors.
pub fn plugin(data: StochasticsData) -> Result<Plugin, KernelError> {
    Plugin::builder(PLUGIN_ID)
        .add_plugin_data(data)
        .set_initializer(|ctx| {
            let data = ctx.plugin_data::<StochasticsData>()?;
            debug!(word_position = %data.word_position, "Random stream restored");
            ctx.add_data_manager(StochasticsDataManager::from_plugin_data(data))
        })
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn restored_stream_continues_where_it_stopped() {
        let data = StochasticsData::builder().set_seed(7).build();
        let mut uninterrupted = data.generator();
        let mut first_half = data.generator();
        for _ in 0..25 {
            assert_eq!(first_half.random::<u64>(), uninterrupted.random::<u64>());
        }

        let paused = StochasticsData::builder()
            .set_seed_bytes(first_half.get_seed())
            .set_word_position(first_half.get_word_pos())
            .build();
        let mut resumed = paused.generator();
        for _ in 0..25 {
            assert_eq!(resumed.random::<u64>(), uninterrupted.random::<u64>());
        }
    }

    #[test]
    fn word_position_is_a_string_in_json() {
        let data = StochasticsData::builder()
            .set_seed(1)
            .set_word_position(u128::from(u64::MAX).saturating_add(5))
            .build();
        let json = data.to_json().unwrap();
        assert_eq!(
            json.get("word_position"),
            Some(&serde_json::json!("18446744073709551620"))
        );
        let parsed: StochasticsData = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, data);
    }

    #[test]
    fn different_seeds_give_different_streams() {
        let a = StochasticsData::builder().set_seed(1).build();
        let b = StochasticsData::builder().set_seed(2).build();
        assert_ne!(a.seed(), b.seed());
        assert_eq!(a.word_position(), 0);
    }
}
