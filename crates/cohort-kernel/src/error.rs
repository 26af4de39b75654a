//! Kernel error taxonomy.
//!
//! Every caller mistake surfaces as a [`KernelError`] returned from the
//! validation phase of a command or from a context operation, before any
//! state is touched.

use cohort_properties::{PropertyError, PropertyType};
use cohort_types::{PluginId, SemanticVersion};

/// Errors raised by the simulation kernel and by data managers built on it.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// A required argument or builder field was not supplied.
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    /// An identifier was not registered.
    #[error("unknown {kind}: {id}")]
    UnknownIdentifier {
        /// What kind of identifier was looked up.
        kind: &'static str,
        /// The identifier, rendered for display.
        id: String,
    },

    /// An identifier was registered twice.
    #[error("duplicate {kind}: {id}")]
    DuplicateIdentifier {
        /// What kind of identifier was registered.
        kind: &'static str,
        /// The identifier, rendered for display.
        id: String,
    },

    /// A value's type does not match its property definition.
    #[error("incompatible value for property {property}: expected {expected}, got {actual}")]
    IncompatibleValue {
        /// The property being assigned.
        property: String,
        /// The type declared by the definition.
        expected: PropertyType,
        /// The type of the supplied value.
        actual: PropertyType,
    },

    /// An immutable property was assigned after initialization.
    #[error("property {property} is immutable")]
    ImmutableProperty {
        /// The property being assigned.
        property: String,
    },

    /// A plan was scheduled before the current time or at a non-finite time.
    #[error("invalid plan time {requested} (current time {current})")]
    InvalidPlanTime {
        /// The requested firing time.
        requested: f64,
        /// The simulation time when the request was made.
        current: f64,
    },

    /// A labeler id was registered twice for the same event type.
    #[error("duplicate labeler {labeler} for event {event}")]
    DuplicateLabeler {
        /// The event type name.
        event: &'static str,
        /// The labeler id.
        labeler: String,
    },

    /// Plugin data was written by an incompatible version.
    #[error("plugin {plugin} cannot load data version {found} (supports {supported})")]
    UnsupportedVersion {
        /// The plugin loading the data.
        plugin: PluginId,
        /// The version recorded in the data.
        found: String,
        /// The version the running code writes.
        supported: SemanticVersion,
    },

    /// A domain-specific precondition failed.
    #[error("precondition violated: {reason}")]
    Precondition {
        /// Human-readable description of the violated precondition.
        reason: String,
    },

    /// A property container rejected an operation.
    #[error("property error: {source}")]
    Property {
        /// The underlying container error.
        #[from]
        source: PropertyError,
    },

    /// Plugin dependencies form a cycle.
    #[error("circular plugin dependency among: {plugins:?}")]
    CircularPluginDependency {
        /// Plugins that could not be ordered.
        plugins: Vec<PluginId>,
    },

    /// Plugin data could not be converted to or from JSON.
    #[error("snapshot serialization failed: {source}")]
    Serialization {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// An internal invariant was broken. Indicates a kernel defect.
    #[error("internal kernel error: {0}")]
    Internal(&'static str),
}

impl KernelError {
    /// Shorthand for [`KernelError::Precondition`].
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`KernelError::UnknownIdentifier`].
    pub fn unknown(kind: &'static str, id: &impl core::fmt::Display) -> Self {
        Self::UnknownIdentifier {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`KernelError::DuplicateIdentifier`].
    pub fn duplicate(kind: &'static str, id: &impl core::fmt::Display) -> Self {
        Self::DuplicateIdentifier {
            kind,
            id: id.to_string(),
        }
    }
}
