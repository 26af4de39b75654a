//! Semantic versions attached to plugin data.
//!
//! A plugin stamps every snapshot it builds with its current data version.
//! When a snapshot is loaded, the plugin accepts it only if it was written
//! by the same major version and is not newer than the running code.

use serde::{Deserialize, Serialize};

/// A `major.minor.patch` version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SemanticVersion {
    /// Incompatible layout changes.
    pub major: u32,
    /// Backward-compatible additions.
    pub minor: u32,
    /// Fixes that do not change the layout.
    pub patch: u32,
}

impl SemanticVersion {
    /// Construct a version from its parts.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a `major.minor.patch` string.
    ///
    /// Returns `None` if the string does not have exactly three numeric
    /// components.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }

    /// Whether data written at version `found` can be loaded by code at
    /// version `self`.
    pub fn can_load(self, found: Self) -> bool {
        self.major == found.major && found <= self
    }
}

impl core::fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
