//! Inventory and type source contracts.
//!
//! Sources are external collaborators: in production they run queries
//! against the inventory database. Errors from arbitrary client libraries
//! convert into [`SourceError::Other`] through `anyhow`.

use async_trait::async_trait;

use crate::device_type::DeviceTypeDef;
use crate::error::SourceError;
use crate::netbox::NetboxRecord;

/// Delivers the active netbox population.
#[async_trait]
pub trait NetboxSource: Send + Sync {
    /// Fetch every active netbox, in polling order.
    async fn fetch_netboxes(&self) -> Result<Vec<NetboxRecord>, SourceError>;
}

/// Delivers device type definitions.
#[async_trait]
pub trait TypeSource: Send + Sync {
    async fn fetch_types(&self) -> Result<Vec<DeviceTypeDef>, SourceError>;
}

/// A source serving a fixed list. Useful for tests and static deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pub netboxes: Vec<NetboxRecord>,
    pub types: Vec<DeviceTypeDef>,
}

impl StaticSource {
    pub fn new(netboxes: Vec<NetboxRecord>, types: Vec<DeviceTypeDef>) -> Self {
        Self { netboxes, types }
    }
}

#[async_trait]
impl NetboxSource for StaticSource {
    async fn fetch_netboxes(&self) -> Result<Vec<NetboxRecord>, SourceError> {
        Ok(self.netboxes.clone())
    }
}

#[async_trait]
impl TypeSource for StaticSource {
    async fn fetch_types(&self) -> Result<Vec<DeviceTypeDef>, SourceError> {
        Ok(self.types.clone())
    }
}
