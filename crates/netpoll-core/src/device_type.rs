//! Device types and the device-type registry.
//!
//! A device type bundles the attributes that can be queried on a netbox of
//! that type together with how often each one is polled. Types are immutable
//! once built; the registry replaces them wholesale on every reload so that
//! in-flight polls keep working against the snapshot they started with.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;

/// Longest accepted poll frequency, in seconds (one year).
pub const MAX_FREQUENCY_SECS: u64 = 366 * 24 * 3600;

/// Protocol-level description of what to fetch for an attribute
/// (for SNMP, the OID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor(pub String);

impl QueryDescriptor {
    pub fn new(query: impl Into<String>) -> Self {
        Self(query.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Poll interval and query for one attribute of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub interval: Duration,
    pub query: QueryDescriptor,
}

/// Attribute row as delivered by a type source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute key, e.g. `ifDescr`
    pub key: String,
    /// Query descriptor for the attribute
    pub query: String,
    /// Attribute-specific poll frequency; falls back to the type frequency
    #[serde(default)]
    pub frequency_secs: Option<u64>,
}

/// Type definition as delivered by a type source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTypeDef {
    pub type_id: String,
    /// Default poll frequency for the type's attributes
    pub frequency_secs: u64,
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
}

/// An immutable device type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceType {
    type_id: String,
    frequency: Duration,
    attributes: BTreeMap<String, AttributeSpec>,
}

impl DeviceType {
    /// Create a type with no attributes.
    pub fn new(type_id: impl Into<String>, frequency: Duration) -> Self {
        Self {
            type_id: type_id.into(),
            frequency,
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute. `interval` of `None` uses the type frequency.
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        query: impl Into<String>,
        interval: Option<Duration>,
    ) -> Self {
        let interval = interval.unwrap_or(self.frequency);
        self.attributes.insert(
            key.into(),
            AttributeSpec {
                interval,
                query: QueryDescriptor::new(query),
            },
        );
        self
    }

    /// Build a type from a source definition.
    pub fn from_def(def: DeviceTypeDef) -> Result<Self, Error> {
        let invalid = |message: String| Error::InvalidType {
            type_id: def.type_id.clone(),
            message,
        };

        if def.frequency_secs == 0 {
            return Err(invalid("type frequency must be positive".to_string()));
        }
        if def.frequency_secs > MAX_FREQUENCY_SECS {
            return Err(invalid(format!("type frequency exceeds {MAX_FREQUENCY_SECS}s")));
        }

        let mut device_type = Self::new(def.type_id.clone(), Duration::from_secs(def.frequency_secs));
        for attr in &def.attributes {
            if device_type.attributes.contains_key(&attr.key) {
                return Err(invalid(format!("duplicate attribute {}", attr.key)));
            }
            let interval = match attr.frequency_secs {
                Some(0) => {
                    return Err(invalid(format!("attribute {} has zero frequency", attr.key)));
                }
                Some(secs) if secs > MAX_FREQUENCY_SECS => {
                    return Err(invalid(format!(
                        "attribute {} frequency exceeds {MAX_FREQUENCY_SECS}s",
                        attr.key
                    )));
                }
                Some(secs) => Some(Duration::from_secs(secs)),
                None => None,
            };
            device_type = device_type.with_attribute(attr.key.clone(), attr.query.clone(), interval);
        }
        Ok(device_type)
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    /// Default poll frequency of the type.
    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeSpec> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeSpec> {
        self.attributes.get(key)
    }

    /// Poll interval of an attribute.
    pub fn interval(&self, key: &str) -> Option<Duration> {
        self.attributes.get(key).map(|a| a.interval)
    }

    /// True if every key is defined for this type.
    pub fn supports_all<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        keys.iter().all(|k| self.attributes.contains_key(k.as_ref()))
    }

    /// Shortest attribute interval, or the type frequency when there are none.
    pub fn min_interval(&self) -> Duration {
        self.attributes
            .values()
            .map(|a| a.interval)
            .min()
            .unwrap_or(self.frequency)
    }
}

/// Registry of device types, replaced wholesale on reload.
pub struct TypeRegistry {
    types: RwLock<Arc<HashMap<String, Arc<DeviceType>>>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Look up a type by id.
    pub fn get(&self, type_id: &str) -> Option<Arc<DeviceType>> {
        self.types.read().get(type_id).cloned()
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.types.read().contains_key(type_id)
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// Current set of types.
    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<DeviceType>>> {
        self.types.read().clone()
    }

    /// Replace every type with the given definitions.
    ///
    /// Invalid definitions and types without attributes are skipped. Returns
    /// the number of registered types.
    pub fn replace_all(&self, defs: Vec<DeviceTypeDef>) -> usize {
        let mut types = HashMap::with_capacity(defs.len());
        for def in defs {
            if def.attributes.is_empty() {
                tracing::debug!(type_id = %def.type_id, "Skipping type without attributes");
                continue;
            }
            match DeviceType::from_def(def) {
                Ok(t) => {
                    types.insert(t.type_id().to_string(), Arc::new(t));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping invalid device type");
                }
            }
        }
        self.install(types)
    }

    fn install(&self, types: HashMap<String, Arc<DeviceType>>) -> usize {
        let count = types.len();
        *self.types.write() = Arc::new(types);
        tracing::debug!(count, "Device type registry updated");
        count
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
