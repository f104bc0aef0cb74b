//! Data containers passed from device handlers to data handlers.
//!
//! Each data plugin supplies one container per netbox per poll cycle. Device
//! handlers look up the containers they know by concrete type, fill them and
//! commit them; the owning data handler persists a container only when it has
//! been committed.

use std::any::Any;

/// Per-cycle scratch space owned by one data plugin.
pub trait DataContainer: Any + Send + Sync {
    /// Name of the container, usually the owning plugin's id.
    fn name(&self) -> &str;

    /// Mark the container as complete. Committing twice has no further effect.
    fn commit(&mut self);

    fn is_committed(&self) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A one-way commit flag for container implementations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommitFlag(bool);

impl CommitFlag {
    pub fn new() -> Self {
        Self(false)
    }

    /// Set the flag. Returns true only on the first call.
    pub fn set(&mut self) -> bool {
        let first = !self.0;
        self.0 = true;
        first
    }

    pub fn is_set(&self) -> bool {
        self.0
    }
}

struct Entry {
    plugin_id: String,
    container: Box<dyn DataContainer>,
}

/// The containers of one poll cycle, in data plugin registration order.
#[derive(Default)]
pub struct DataContainers {
    entries: Vec<Entry>,
}

impl DataContainers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the container created by `plugin_id`.
    pub fn insert(&mut self, plugin_id: impl Into<String>, container: Box<dyn DataContainer>) {
        self.entries.push(Entry {
            plugin_id: plugin_id.into(),
            container,
        });
    }

    /// First container of concrete type `T`.
    pub fn get<T: DataContainer>(&self) -> Option<&T> {
        self.entries
            .iter()
            .find_map(|e| e.container.as_any().downcast_ref::<T>())
    }

    /// First container of concrete type `T`, mutably.
    pub fn get_mut<T: DataContainer>(&mut self) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find_map(|e| e.container.as_any_mut().downcast_mut::<T>())
    }

    /// Container by its [`DataContainer::name`].
    pub fn by_name(&self, name: &str) -> Option<&dyn DataContainer> {
        self.entries
            .iter()
            .find(|e| e.container.name() == name)
            .map(|e| e.container.as_ref())
    }

    /// Container created by the given data plugin.
    pub fn for_plugin(&self, plugin_id: &str) -> Option<&dyn DataContainer> {
        self.entries
            .iter()
            .find(|e| e.plugin_id == plugin_id)
            .map(|e| e.container.as_ref())
    }

    /// (plugin id, container) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn DataContainer)> {
        self.entries
            .iter()
            .map(|e| (e.plugin_id.as_str(), e.container.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for DataContainers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.plugin_id, e.container.is_committed())))
            .finish()
    }
}
