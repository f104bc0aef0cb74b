//! Core types and plugin contracts for netpoll.
//!
//! This crate defines what the scheduler works on (device types, netboxes and
//! their poll schedule) and the contracts its collaborators implement: device
//! and data handler plugins, the protocol client and the inventory sources.

pub mod config;
pub mod container;
pub mod device_type;
pub mod error;
pub mod netbox;
pub mod plugin;
pub mod protocol;
pub mod source;
pub mod storage;

pub use config::SchedulerConfig;
pub use container::{CommitFlag, DataContainer, DataContainers};
pub use device_type::{AttributeDef, AttributeSpec, DeviceType, DeviceTypeDef, QueryDescriptor, TypeRegistry};
pub use error::{panic_message, ConfigError, Error, HandlerError, PersistError, ProtocolError, Result, SourceError};
pub use netbox::{Netbox, NetboxRecord, MAX_RETRIES};
pub use plugin::{
    Change, ChangeSet, DataHandler, DeviceHandler, HandleConfidence, PluginCatalog, PluginSet,
};
pub use protocol::{ProtocolClient, Rows};
pub use source::{NetboxSource, StaticSource, TypeSource};
pub use storage::{PluginStorage, PluginStorageTable};

/// Re-exports for plugin authors.
pub mod prelude {
    pub use crate::container::{CommitFlag, DataContainer, DataContainers};
    pub use crate::device_type::QueryDescriptor;
    pub use crate::error::{HandlerError, PersistError, ProtocolError};
    pub use crate::netbox::Netbox;
    pub use crate::plugin::{Change, ChangeSet, DataHandler, DeviceHandler, HandleConfidence};
    pub use crate::protocol::ProtocolClient;
    pub use crate::storage::PluginStorage;
    pub use async_trait::async_trait;
    pub use serde_json::Value;
}
