//! Plugin contracts.
//!
//! Polling is split into two plugin stages:
//!
//! - A [`DeviceHandler`] claims the netboxes it understands, queries them
//!   through the [`ProtocolClient`] and writes what it finds into the data
//!   containers of the cycle.
//! - A [`DataHandler`] supplies one container per cycle and persists it once
//!   the device handlers are done.
//!
//! Plugins are registered once in a [`PluginCatalog`] of factories. Each
//! (re)load instantiates a fresh [`PluginSet`].

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::container::{DataContainer, DataContainers};
use crate::error::{Error, HandlerError, PersistError};
use crate::netbox::Netbox;
use crate::protocol::ProtocolClient;
use crate::storage::PluginStorage;

/// How strongly a device handler claims a netbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleConfidence {
    /// Always run, independent of other handlers.
    Always,
    /// Compete with other scoring handlers; the highest absolute score wins.
    /// A score of zero is no claim.
    Score(i32),
    /// Never run.
    Never,
}

impl HandleConfidence {
    /// `Always` if the condition holds, `Never` otherwise.
    pub fn always_if(condition: bool) -> Self {
        if condition {
            Self::Always
        } else {
            Self::Never
        }
    }
}

/// A plugin that interprets protocol responses for the netboxes it claims.
#[async_trait]
pub trait DeviceHandler: Send + Sync {
    /// Plugin id.
    fn name(&self) -> &str;

    /// Decide whether this handler applies to the netbox.
    ///
    /// Usually answered from [`Netbox::is_supported`] and the netbox's type
    /// and category.
    fn can_handle(&self, netbox: &Netbox) -> Result<HandleConfidence, HandlerError>;

    /// Poll the netbox and fill the containers.
    ///
    /// Return [`HandlerError::Timeout`] (or let a [`ProtocolError::Timeout`]
    /// convert into it) to abandon only this handler's turn.
    ///
    /// [`ProtocolError::Timeout`]: crate::error::ProtocolError::Timeout
    async fn handle(
        &self,
        netbox: &Netbox,
        client: &dyn ProtocolClient,
        config: &Value,
        containers: &mut DataContainers,
    ) -> Result<(), HandlerError>;
}

/// A plugin that owns a data container and persists it.
#[async_trait]
pub trait DataHandler: Send + Sync {
    /// Plugin id. Also keys the plugin's [`PluginStorage`].
    fn name(&self) -> &str;

    /// Prepare persistent state. Runs until it succeeds once per process.
    async fn init_persistent_storage(&self, _storage: &PluginStorage) -> Result<(), PersistError> {
        Ok(())
    }

    /// Create an empty container for one poll cycle.
    fn container_factory(&self) -> Box<dyn DataContainer>;

    /// Persist the container. Implementations skip containers that were not
    /// committed.
    async fn persist(
        &self,
        netbox: &Netbox,
        container: &dyn DataContainer,
        changes: &ChangeSet,
        storage: &PluginStorage,
    ) -> Result<(), PersistError>;
}

/// Kind of change recorded for a sub-device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    Added,
    Updated,
    Deleted,
}

/// Sub-devices changed during one poll cycle, shared by every data handler
/// of that cycle.
#[derive(Debug, Default)]
pub struct ChangeSet {
    changes: Mutex<BTreeMap<String, Change>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change. A later record for the same id replaces the earlier one.
    pub fn record(&self, device_id: impl Into<String>, change: Change) {
        self.changes.lock().insert(device_id.into(), change);
    }

    pub fn get(&self, device_id: &str) -> Option<Change> {
        self.changes.lock().get(device_id).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Change> {
        self.changes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.changes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.lock().is_empty()
    }
}

/// Instantiated plugins, in registration order.
#[derive(Clone, Default)]
pub struct PluginSet {
    device_handlers: Vec<Arc<dyn DeviceHandler>>,
    data_handlers: Vec<Arc<dyn DataHandler>>,
}

impl PluginSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_handler(mut self, handler: Arc<dyn DeviceHandler>) -> Self {
        self.device_handlers.push(handler);
        self
    }

    pub fn with_data_handler(mut self, handler: Arc<dyn DataHandler>) -> Self {
        self.data_handlers.push(handler);
        self
    }

    pub fn device_handlers(&self) -> &[Arc<dyn DeviceHandler>] {
        &self.device_handlers
    }

    pub fn data_handlers(&self) -> &[Arc<dyn DataHandler>] {
        &self.data_handlers
    }

    pub fn is_empty(&self) -> bool {
        self.device_handlers.is_empty() && self.data_handlers.is_empty()
    }
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSet")
            .field(
                "device_handlers",
                &self.device_handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field(
                "data_handlers",
                &self.data_handlers.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

type DeviceHandlerFactory = Box<dyn Fn() -> Arc<dyn DeviceHandler> + Send + Sync>;
type DataHandlerFactory = Box<dyn Fn() -> Arc<dyn DataHandler> + Send + Sync>;

/// Registration table of plugin factories, filled once at startup.
#[derive(Default)]
pub struct PluginCatalog {
    device_handlers: Vec<(String, DeviceHandlerFactory)>,
    data_handlers: Vec<(String, DataHandlerFactory)>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device handler factory.
    pub fn register_device_handler<F>(&mut self, id: impl Into<String>, factory: F) -> Result<(), Error>
    where
        F: Fn() -> Arc<dyn DeviceHandler> + Send + Sync + 'static,
    {
        let id = id.into();
        if self.device_handlers.iter().any(|(existing, _)| *existing == id) {
            return Err(Error::DuplicatePlugin(id));
        }
        tracing::debug!(plugin_id = %id, "Registered device handler");
        self.device_handlers.push((id, Box::new(factory)));
        Ok(())
    }

    /// Register a data handler factory.
    pub fn register_data_handler<F>(&mut self, id: impl Into<String>, factory: F) -> Result<(), Error>
    where
        F: Fn() -> Arc<dyn DataHandler> + Send + Sync + 'static,
    {
        let id = id.into();
        if self.data_handlers.iter().any(|(existing, _)| *existing == id) {
            return Err(Error::DuplicatePlugin(id));
        }
        tracing::debug!(plugin_id = %id, "Registered data handler");
        self.data_handlers.push((id, Box::new(factory)));
        Ok(())
    }

    /// Create a fresh instance of every registered plugin.
    pub fn instantiate(&self) -> PluginSet {
        PluginSet {
            device_handlers: self.device_handlers.iter().map(|(_, f)| f()).collect(),
            data_handlers: self.data_handlers.iter().map(|(_, f)| f()).collect(),
        }
    }

    pub fn device_handler_ids(&self) -> impl Iterator<Item = &str> {
        self.device_handlers.iter().map(|(id, _)| id.as_str())
    }

    pub fn data_handler_ids(&self) -> impl Iterator<Item = &str> {
        self.data_handlers.iter().map(|(id, _)| id.as_str())
    }
}
