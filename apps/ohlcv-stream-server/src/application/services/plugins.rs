//! Plugin Registry
//!
//! Maps a market name to its live-source adapter. Adapters are registered
//! either as ready instances or as factories that are realized on first
//! use. A factory runs at most once per successful realization, even when
//! many tasks load the same market concurrently. Failed realizations leave
//! nothing behind, so the next load retries.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::OnceCell;

use crate::application::ports::{MarketPlugin, PluginError};

/// Deferred constructor for a plugin.
pub type PluginFactory =
    Arc<dyn Fn() -> Result<Arc<dyn MarketPlugin>, PluginError> + Send + Sync>;

struct LazyPlugin {
    factory: PluginFactory,
    cell: OnceCell<Arc<dyn MarketPlugin>>,
}

/// Market name to adapter map.
#[derive(Default)]
pub struct PluginRegistry {
    instances: RwLock<HashMap<String, Arc<dyn MarketPlugin>>>,
    factories: RwLock<HashMap<String, Arc<LazyPlugin>>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.list())
            .finish()
    }
}

impl PluginRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a ready plugin under `name`, replacing any previous entry.
    pub fn register_instance(&self, name: &str, plugin: Arc<dyn MarketPlugin>) {
        let name = normalize(name);
        self.factories.write().remove(&name);
        tracing::info!(plugin = %name, "Registered plugin instance");
        self.instances.write().insert(name, plugin);
    }

    /// Register a factory under `name`, realized on first `load`.
    pub fn register_factory(&self, name: &str, factory: PluginFactory) {
        let name = normalize(name);
        self.instances.write().remove(&name);
        tracing::info!(plugin = %name, "Registered plugin factory");
        self.factories.write().insert(
            name,
            Arc::new(LazyPlugin {
                factory,
                cell: OnceCell::new(),
            }),
        );
    }

    /// Resolve the plugin for `name`.
    ///
    /// # Errors
    ///
    /// Returns `PluginError::NotFound` for an unknown market and
    /// `PluginError::InitFailed` when the factory fails.
    pub async fn load(&self, name: &str) -> Result<Arc<dyn MarketPlugin>, PluginError> {
        let name = normalize(name);

        if let Some(plugin) = self.instances.read().get(&name) {
            return Ok(Arc::clone(plugin));
        }

        let lazy = self
            .factories
            .read()
            .get(&name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound { name: name.clone() })?;

        let plugin = lazy
            .cell
            .get_or_try_init(|| async {
                let result = (lazy.factory)();
                match &result {
                    Ok(_) => tracing::info!(plugin = %name, "Plugin initialized"),
                    Err(e) => tracing::warn!(plugin = %name, error = %e, "Plugin initialization failed"),
                }
                result.map_err(|e| match e {
                    PluginError::InitFailed { .. } => e,
                    other => PluginError::InitFailed {
                        name: name.clone(),
                        reason: other.to_string(),
                    },
                })
            })
            .await?;

        Ok(Arc::clone(plugin))
    }

    /// Sorted names of every registered plugin, realized or not.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .instances
            .read()
            .keys()
            .chain(self.factories.read().keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Whether any plugin is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty() && self.factories.read().is_empty()
    }

    /// Whether the factory for `name` has produced an instance.
    #[must_use]
    pub fn is_realized(&self, name: &str) -> bool {
        let name = normalize(name);
        self.instances.read().contains_key(&name)
            || self
                .factories
                .read()
                .get(&name)
                .is_some_and(|lazy| lazy.cell.initialized())
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

// =============================================================================
// Tests
// =============================================================================
