//! One netbox poll cycle.
//!
//! A cycle builds the data containers, runs the resolved device handlers in
//! order and then hands every container to its data handler. Device handler
//! failures end the handler phase early, but the persist phase always runs.
//! A plugin panic is caught and treated as a failure of that plugin call.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use netpoll_core::{
    ChangeSet, DataContainers, DataHandler, HandlerError, Netbox, PersistError, PluginSet,
    PluginStorage, PluginStorageTable, ProtocolClient,
};
use serde_json::Value;
use tokio::time::Instant;

use crate::resolver::HandlerResolver;
use crate::stats::SchedulerStats;

/// How a poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every device handler ran.
    Completed,
    /// No device handler applied to the netbox.
    Unhandled,
    /// A device handler failed and the remaining ones were skipped.
    Aborted,
}

/// Everything a worker needs to poll a netbox.
pub struct Worker {
    resolver: Arc<HandlerResolver>,
    storages: Arc<PluginStorageTable>,
    client: Arc<dyn ProtocolClient>,
    handler_config: Arc<Value>,
    stats: Arc<SchedulerStats>,
}

impl Worker {
    pub fn new(
        resolver: Arc<HandlerResolver>,
        storages: Arc<PluginStorageTable>,
        client: Arc<dyn ProtocolClient>,
        handler_config: Arc<Value>,
        stats: Arc<SchedulerStats>,
    ) -> Self {
        Self {
            resolver,
            storages,
            client,
            handler_config,
            stats,
        }
    }

    /// Run one poll cycle. `total` is the current inventory size, for logging.
    ///
    /// Rescheduling the netbox is left to the caller.
    pub async fn poll(&self, netbox: &Netbox, total: usize) -> CycleOutcome {
        let started = Instant::now();
        tracing::debug!(
            netbox_id = %netbox.id(),
            sysname = %netbox.sysname(),
            "Polling device {} of {}",
            netbox.seq(),
            total
        );

        let plugins = self.resolver.plugins();
        let (mut containers, data_handlers) = self.build_containers(&plugins).await;

        let handlers = self.resolver.resolve_with(&plugins, netbox);
        let outcome = if handlers.is_empty() {
            tracing::info!(
                netbox_id = %netbox.id(),
                sysname = %netbox.sysname(),
                type_id = %netbox.type_id(),
                "No device handlers found"
            );
            self.stats.record_unhandled();
            CycleOutcome::Unhandled
        } else {
            let mut outcome = CycleOutcome::Completed;
            for handler in handlers.iter() {
                let call = handler.handle(netbox, self.client.as_ref(), &self.handler_config, &mut containers);
                let result = AssertUnwindSafe(call)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(HandlerError::from_panic(payload)));
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_timeout() => {
                        tracing::warn!(
                            netbox_id = %netbox.id(),
                            plugin = handler.name(),
                            error = %e,
                            "Device handler timed out"
                        );
                        self.stats.record_handler_timeout();
                    }
                    Err(e @ HandlerError::ObsoleteInterface(_)) => {
                        tracing::error!(
                            netbox_id = %netbox.id(),
                            plugin = handler.name(),
                            error = %e,
                            "Device handler uses an obsolete plugin interface, aborting cycle"
                        );
                        self.stats.record_obsolete_plugin();
                        outcome = CycleOutcome::Aborted;
                        break;
                    }
                    Err(e @ HandlerError::Panicked(_)) => {
                        tracing::error!(
                            netbox_id = %netbox.id(),
                            plugin = handler.name(),
                            error = %e,
                            "Device handler panicked, aborting cycle"
                        );
                        self.stats.record_handler_failure();
                        outcome = CycleOutcome::Aborted;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            netbox_id = %netbox.id(),
                            plugin = handler.name(),
                            error = %e,
                            "Device handler failed, aborting cycle"
                        );
                        self.stats.record_handler_failure();
                        outcome = CycleOutcome::Aborted;
                        break;
                    }
                }
            }
            outcome
        };

        self.persist_all(netbox, &containers, &data_handlers).await;

        let elapsed = started.elapsed();
        self.stats.record_cycle(elapsed);
        tracing::debug!(
            netbox_id = %netbox.id(),
            elapsed_ms = elapsed.as_millis() as u64,
            ?outcome,
            "Poll cycle finished"
        );
        outcome
    }

    /// Create one container per data handler whose storage is initialized.
    async fn build_containers(
        &self,
        plugins: &PluginSet,
    ) -> (DataContainers, Vec<(Arc<dyn DataHandler>, Arc<PluginStorage>)>) {
        let mut containers = DataContainers::new();
        let mut active = Vec::with_capacity(plugins.data_handlers().len());

        for handler in plugins.data_handlers() {
            let storage = self.storages.get_or_create(handler.name());
            let init = storage
                .initialize_with(|| {
                    AssertUnwindSafe(handler.init_persistent_storage(&storage))
                        .catch_unwind()
                        .map(|r| r.unwrap_or_else(|payload| Err(PersistError::from_panic(payload))))
                })
                .await;
            if let Err(e) = init {
                tracing::warn!(
                    plugin = handler.name(),
                    error = %e,
                    "Persistent storage init failed, skipping data handler this cycle"
                );
                self.stats.record_storage_init_failure();
                continue;
            }
            containers.insert(handler.name(), handler.container_factory());
            active.push((handler.clone(), storage));
        }

        (containers, active)
    }

    async fn persist_all(
        &self,
        netbox: &Netbox,
        containers: &DataContainers,
        data_handlers: &[(Arc<dyn DataHandler>, Arc<PluginStorage>)],
    ) {
        let changes = ChangeSet::new();
        for (handler, storage) in data_handlers {
            let Some(container) = containers.for_plugin(handler.name()) else {
                continue;
            };
            let result = AssertUnwindSafe(handler.persist(netbox, container, &changes, storage))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(PersistError::from_panic(payload)));
            if let Err(e) = result {
                tracing::warn!(
                    netbox_id = %netbox.id(),
                    plugin = handler.name(),
                    error = %e,
                    "Data handler failed to persist"
                );
                self.stats.record_persist_failure();
            }
        }
        if !changes.is_empty() {
            tracing::debug!(netbox_id = %netbox.id(), changed = changes.len(), "Sub-devices changed");
        }
    }
}
