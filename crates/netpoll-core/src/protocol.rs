//! Protocol client contract.
//!
//! The wire encoding lives outside this workspace. A client answers "get all
//! rows under this query" for a netbox and maps a device that does not answer
//! in time to [`ProtocolError::Timeout`].

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::device_type::QueryDescriptor;
use crate::error::ProtocolError;
use crate::netbox::Netbox;

/// Walk result: (index, value) pairs in the order the device returned them.
pub type Rows = Vec<(String, String)>;

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Fetch every row under `query` from the netbox.
    async fn get_all(&self, netbox: &Netbox, query: &QueryDescriptor) -> Result<Rows, ProtocolError>;

    /// Same as [`get_all`](Self::get_all), keyed by index.
    ///
    /// When an index repeats, the last value wins.
    async fn get_all_map(
        &self,
        netbox: &Netbox,
        query: &QueryDescriptor,
    ) -> Result<BTreeMap<String, String>, ProtocolError> {
        Ok(self.get_all(netbox, query).await?.into_iter().collect())
    }
}
