//! Shared value types for the Cohort simulation kernel.
//!
//! Every crate in the workspace depends on this one for identifiers and
//! snapshot versioning, so it carries no simulation logic of its own.
//!
//! # Modules
//!
//! - [`ids`] -- Integer-backed entity and bookkeeping identifiers, plus the
//!   UUID-backed [`RunId`].
//! - [`version`] -- [`SemanticVersion`] parsing and compatibility checks for
//!   plugin data.

pub mod ids;
pub mod version;

pub use ids::{PersonId, PlanId, PluginId, RunId, SubscriberId};
pub use version::SemanticVersion;
