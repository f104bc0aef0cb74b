//! Device handler resolution.
//!
//! Every device handler is asked whether it can handle a netbox. Handlers
//! answering [`HandleConfidence::Always`] are kept, followed by every scorer
//! tied at the highest absolute score. Both groups keep registration order.
//! Results are cached per netbox id until the plugin set is reloaded.
//!
//! The cache is not invalidated when a netbox changes type. A netbox whose
//! type changes keeps its id, so it keeps the handlers resolved for its old
//! type until the next plugin reload.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use netpoll_core::{DeviceHandler, HandleConfidence, HandlerError, Netbox, PluginSet};
use parking_lot::RwLock;

/// Ordered device handlers for one netbox.
pub type ResolvedHandlers = Arc<[Arc<dyn DeviceHandler>]>;

struct ResolverState {
    plugins: Arc<PluginSet>,
    cache: HashMap<String, ResolvedHandlers>,
}

/// Resolves and caches the device handlers applying to each netbox.
pub struct HandlerResolver {
    state: RwLock<ResolverState>,
}

impl HandlerResolver {
    pub fn new(plugins: PluginSet) -> Self {
        Self {
            state: RwLock::new(ResolverState {
                plugins: Arc::new(plugins),
                cache: HashMap::new(),
            }),
        }
    }

    /// Current plugin set.
    pub fn plugins(&self) -> Arc<PluginSet> {
        self.state.read().plugins.clone()
    }

    /// Swap in a new plugin set and drop every cached resolution.
    pub fn reload(&self, plugins: PluginSet) {
        let mut state = self.state.write();
        state.plugins = Arc::new(plugins);
        state.cache.clear();
        tracing::info!(
            device_handlers = state.plugins.device_handlers().len(),
            data_handlers = state.plugins.data_handlers().len(),
            "Plugin set reloaded"
        );
    }

    /// Resolve against the current plugin set.
    pub fn resolve(&self, netbox: &Netbox) -> ResolvedHandlers {
        let plugins = self.plugins();
        self.resolve_with(&plugins, netbox)
    }

    /// Resolve against a plugin set snapshot taken by the caller.
    ///
    /// The result is cached only if `plugins` is still the current set and
    /// at least one handler applies.
    pub fn resolve_with(&self, plugins: &Arc<PluginSet>, netbox: &Netbox) -> ResolvedHandlers {
        {
            let state = self.state.read();
            if Arc::ptr_eq(&state.plugins, plugins) {
                if let Some(cached) = state.cache.get(netbox.id()) {
                    return cached.clone();
                }
            }
        }

        let resolved = select_handlers(plugins.device_handlers(), netbox);
        if resolved.is_empty() {
            return resolved;
        }

        let mut state = self.state.write();
        if Arc::ptr_eq(&state.plugins, plugins) {
            state
                .cache
                .insert(netbox.id().to_string(), resolved.clone());
        }
        resolved
    }

    /// Drop the cached resolution of one netbox.
    pub fn invalidate(&self, netbox_id: &str) -> bool {
        self.state.write().cache.remove(netbox_id).is_some()
    }

    pub fn clear(&self) {
        self.state.write().cache.clear();
    }

    pub fn is_cached(&self, netbox_id: &str) -> bool {
        self.state.read().cache.contains_key(netbox_id)
    }

    pub fn cached_len(&self) -> usize {
        self.state.read().cache.len()
    }
}

fn select_handlers(handlers: &[Arc<dyn DeviceHandler>], netbox: &Netbox) -> ResolvedHandlers {
    let mut always = Vec::new();
    let mut scored = Vec::new();
    let mut high = 0u32;

    for handler in handlers {
        let confidence = catch_unwind(AssertUnwindSafe(|| handler.can_handle(netbox)))
            .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)));
        match confidence {
            Ok(HandleConfidence::Always) => always.push(handler.clone()),
            Ok(HandleConfidence::Score(score)) => {
                let abs = score.unsigned_abs();
                if abs > 0 {
                    high = high.max(abs);
                    scored.push((abs, handler.clone()));
                }
            }
            Ok(HandleConfidence::Never) => {}
            Err(e) => {
                tracing::warn!(
                    plugin = handler.name(),
                    netbox_id = %netbox.id(),
                    error = %e,
                    "Device handler failed in can_handle, skipping"
                );
            }
        }
    }

    always.extend(
        scored
            .into_iter()
            .filter(|(abs, _)| *abs == high)
            .map(|(_, handler)| handler),
    );

    tracing::debug!(
        netbox_id = %netbox.id(),
        handlers = ?always.iter().map(|h| h.name()).collect::<Vec<_>>(),
        "Resolved device handlers"
    );
    always.into()
}
