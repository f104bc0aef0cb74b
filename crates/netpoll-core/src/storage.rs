//! Process-scoped persistent storage for data plugins.
//!
//! Every data plugin gets one [`PluginStorage`] that lives for the whole
//! process and survives plugin reloads. Plugins keep prepared statements,
//! caches of known sub-devices and similar state in it. The storage carries a
//! one-shot initialization guard: the plugin's init routine runs until it
//! succeeds once and never again afterwards.

use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::error::PersistError;

/// Key/value storage of a single data plugin.
pub struct PluginStorage {
    plugin_id: String,
    initialized: OnceCell<()>,
    values: RwLock<HashMap<String, Value>>,
}

impl PluginStorage {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            initialized: OnceCell::new(),
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Run `init` unless a previous call already succeeded.
    ///
    /// Concurrent callers wait for the one running. A failed init leaves the
    /// storage uninitialized so the next call tries again.
    pub async fn initialize_with<F, Fut>(&self, init: F) -> Result<(), PersistError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PersistError>>,
    {
        self.initialized.get_or_try_init(init).await.map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    /// Typed read. Returns `None` if the key is missing or has another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        serde_json::from_value(value).ok()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.write().insert(key.into(), value)
    }

    /// Typed write.
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), PersistError> {
        let value = serde_json::to_value(value).map_err(|e| PersistError::Other(e.to_string()))?;
        self.set(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl std::fmt::Debug for PluginStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginStorage")
            .field("plugin_id", &self.plugin_id)
            .field("initialized", &self.is_initialized())
            .field("keys", &self.len())
            .finish()
    }
}

/// Storage handles of all data plugins, keyed by plugin id.
#[derive(Default)]
pub struct PluginStorageTable {
    storages: RwLock<HashMap<String, Arc<PluginStorage>>>,
}

impl PluginStorageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage of `plugin_id`, created on first use.
    pub fn get_or_create(&self, plugin_id: &str) -> Arc<PluginStorage> {
        if let Some(storage) = self.storages.read().get(plugin_id) {
            return storage.clone();
        }
        self.storages
            .write()
            .entry(plugin_id.to_string())
            .or_insert_with(|| Arc::new(PluginStorage::new(plugin_id)))
            .clone()
    }

    pub fn get(&self, plugin_id: &str) -> Option<Arc<PluginStorage>> {
        self.storages.read().get(plugin_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.storages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.read().is_empty()
    }
}
