//! Plugins and plugin data.
//!
//! A [`Plugin`] bundles an id, the ids of plugins it depends on, its
//! initial [`PluginData`] and an initializer. At startup the orchestrator
//! runs each initializer with a [`PluginContext`] through which the plugin
//! reads its own data and contributes data managers and actors.
//!
//! Plugin data is the immutable snapshot a data manager is built from and
//! reduces itself back to when the run halts. Every value carries a
//! [`SemanticVersion`]; [`check_version`] guards loading.

use core::any::TypeId;
use core::fmt;

use cohort_types::{PluginId, SemanticVersion};

use crate::{AsAny, Context, DataManager, KernelError};

/// Immutable, versioned capture of one data manager's state.
pub trait PluginData: AsAny + fmt::Debug + Send + Sync {
    /// The plugin that owns this data.
    fn plugin_id(&self) -> PluginId;

    /// The data layout version this value was written with.
    fn version(&self) -> SemanticVersion;

    /// Serialize for the snapshot archive.
    fn to_json(&self) -> Result<serde_json::Value, KernelError>;
}

/// Check that data written at `found` can be loaded by code writing
/// `supported`.
///
/// # Errors
///
/// Returns [`KernelError::UnsupportedVersion`] if `found` is malformed, has
/// a different major version or is newer than `supported`.
pub fn check_version(
    plugin: &PluginId,
    supported: SemanticVersion,
    found: &str,
) -> Result<SemanticVersion, KernelError> {
    SemanticVersion::parse(found)
        .filter(|version| supported.can_load(*version))
        .ok_or_else(|| KernelError::UnsupportedVersion {
            plugin: plugin.clone(),
            found: found.to_owned(),
            supported,
        })
}

/// An actor: a one-shot initializer run after every data manager.
pub type Actor = Box<dyn FnOnce(&mut Context<'_>) -> Result<(), KernelError>>;

type PluginInitializer = Box<dyn FnOnce(&mut PluginContext<'_>) -> Result<(), KernelError>>;

/// A unit of simulation composition.
pub struct Plugin {
    pub(crate) id: PluginId,
    pub(crate) dependencies: Vec<PluginId>,
    pub(crate) plugin_data: Vec<Box<dyn PluginData>>,
    pub(crate) initializer: PluginInitializer,
}

impl Plugin {
    /// Start building a plugin.
    pub fn builder(id: impl Into<PluginId>) -> PluginBuilder {
        PluginBuilder {
            id: id.into(),
            dependencies: Vec::new(),
            plugin_data: Vec::new(),
            initializer: None,
        }
    }

    /// The plugin's id.
    pub const fn id(&self) -> &PluginId {
        &self.id
    }

    /// Plugins that must initialize first.
    pub fn dependencies(&self) -> &[PluginId] {
        &self.dependencies
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("plugin_data", &self.plugin_data)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Plugin`]. Consumed by [`build`](Self::build).
pub struct PluginBuilder {
    id: PluginId,
    dependencies: Vec<PluginId>,
    plugin_data: Vec<Box<dyn PluginData>>,
    initializer: Option<PluginInitializer>,
}

impl PluginBuilder {
    /// Require `dependency` to initialize before this plugin.
    #[must_use]
    pub fn add_dependency(mut self, dependency: impl Into<PluginId>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Attach plugin data the initializer can read.
    #[must_use]
    pub fn add_plugin_data(mut self, data: impl PluginData) -> Self {
        self.plugin_data.push(Box::new(data));
        self
    }

    /// Set the initializer.
    #[must_use]
    pub fn set_initializer<F>(mut self, initializer: F) -> Self
    where
        F: FnOnce(&mut PluginContext<'_>) -> Result<(), KernelError> + 'static,
    {
        self.initializer = Some(Box::new(initializer));
        self
    }

    /// Produce the plugin.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::MissingArgument`] if no initializer was set.
    pub fn build(self) -> Result<Plugin, KernelError> {
        Ok(Plugin {
            id: self.id,
            dependencies: self.dependencies,
            plugin_data: self.plugin_data,
            initializer: self
                .initializer
                .ok_or(KernelError::MissingArgument("plugin initializer"))?,
        })
    }
}

impl fmt::Debug for PluginBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginBuilder")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// What a plugin initializer can see and do.
pub struct PluginContext<'a> {
    plugin: &'a PluginId,
    plugin_data: &'a [Box<dyn PluginData>],
    managers: &'a mut Vec<(TypeId, Box<dyn DataManager>)>,
    actors: &'a mut Vec<(PluginId, Actor)>,
}

impl<'a> PluginContext<'a> {
    pub(crate) const fn new(
        plugin: &'a PluginId,
        plugin_data: &'a [Box<dyn PluginData>],
        managers: &'a mut Vec<(TypeId, Box<dyn DataManager>)>,
        actors: &'a mut Vec<(PluginId, Actor)>,
    ) -> Self {
        Self {
            plugin,
            plugin_data,
            managers,
            actors,
        }
    }

    /// The plugin being initialized.
    pub const fn plugin_id(&self) -> &PluginId {
        self.plugin
    }

    /// The plugin's data of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::UnknownIdentifier`] if the plugin carries no
    /// data of that type.
    pub fn plugin_data<T: PluginData>(&self) -> Result<&'a T, KernelError> {
        self.try_plugin_data::<T>()
            .ok_or_else(|| KernelError::unknown("plugin data", &core::any::type_name::<T>()))
    }

    /// The plugin's data of type `T`, if present.
    pub fn try_plugin_data<T: PluginData>(&self) -> Option<&'a T> {
        self.plugin_data
            .iter()
            .find_map(|data| (**data).as_any().downcast_ref::<T>())
    }

    /// Contribute a data manager. Managers initialize in the order added,
    /// across plugins in plugin order.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::DuplicateIdentifier`] if a manager of the same
    /// type was already added.
    pub fn add_data_manager<T: DataManager>(&mut self, manager: T) -> Result<(), KernelError> {
        let type_id = TypeId::of::<T>();
        if self.managers.iter().any(|(existing, _)| *existing == type_id) {
            return Err(KernelError::duplicate("data manager", &manager.name()));
        }
        self.managers.push((type_id, Box::new(manager)));
        Ok(())
    }

    /// Contribute an actor. Actors run after every data manager has
    /// initialized.
    pub fn add_actor<F>(&mut self, actor: F)
    where
        F: FnOnce(&mut Context<'_>) -> Result<(), KernelError> + 'static,
    {
        self.actors.push((self.plugin.clone(), Box::new(actor)));
    }
}

impl fmt::Debug for PluginContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin)
            .field("managers", &self.managers.len())
            .field("actors", &self.actors.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_same_major_not_newer() {
        let plugin = PluginId::from("people");
        let supported = SemanticVersion::new(2, 1, 0);
        assert_eq!(
            check_version(&plugin, supported, "2.0.3").unwrap(),
            SemanticVersion::new(2, 0, 3)
        );
        assert!(matches!(
            check_version(&plugin, supported, "2.2.0"),
            Err(KernelError::UnsupportedVersion { .. })
        ));
        assert!(check_version(&plugin, supported, "1.9.0").is_err());
        assert!(check_version(&plugin, supported, "two").is_err());
    }

    #[test]
    fn plugin_requires_initializer() {
        assert!(matches!(
            Plugin::builder("empty").build(),
            Err(KernelError::MissingArgument(_))
        ));
        let plugin = Plugin::builder("ok")
            .add_dependency("people")
            .set_initializer(|_ctx| Ok(()))
            .build()
            .unwrap();
        assert_eq!(plugin.id().as_str(), "ok");
        assert_eq!(plugin.dependencies(), [PluginId::from("people")]);
    }
}
