//! Type-safe identifier wrappers.
//!
//! Entity identifiers are dense integer indices rather than UUIDs: they are
//! used directly as offsets into property containers, and they must be
//! reproduced exactly when a run is resumed from a snapshot. Only the
//! [`RunId`], which labels one execution and never enters plugin data, is a
//! UUID.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around an unsigned integer with standard derives.
macro_rules! define_index {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty)
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Wrap a raw index value.
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Return the raw index value.
            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_index! {
    /// Dense index of a person. Removed people leave gaps; ids are never reused.
    PersonId(u32)
}

impl PersonId {
    /// Return the id as a property container index.
    pub fn index(self) -> i64 {
        i64::from(self.0)
    }
}

define_index! {
    /// Handle of a scheduled plan. The value is the plan's sequence number,
    /// which breaks ties between plans scheduled for the same time.
    PlanId(u64)
}

define_index! {
    /// Handle of an event subscription, assigned in subscription order.
    SubscriberId(u64)
}

/// Identifier of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(String);

impl PluginId {
    /// Create a plugin id from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the plugin name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PluginId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

/// Unique identifier for one execution of a simulation.
///
/// Run ids use UUID v7 so log lines from a replicate sweep sort by start
/// time. They label outputs only and are never stored in plugin data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new run identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
