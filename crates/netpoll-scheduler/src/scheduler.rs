//! The scheduler: scheduling loop, worker tasks and periodic refresh.
//!
//! A single loop task waits on the [`ScheduleTimer`]. Each firing pops due
//! netboxes and hands each one to a new worker task while slots are free.
//! When the queue yields a netbox but every slot is taken, the netbox goes
//! back to the front of its bucket and the loop sleeps until a slot is
//! released. Workers keep their slot and pull the next due netbox themselves
//! until nothing is due.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use netpoll_core::error::{Error, Result};
use netpoll_core::{
    Netbox, NetboxSource, PluginSet, PluginStorageTable, ProtocolClient, SchedulerConfig,
    TypeRegistry, TypeSource,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::admission::{AdmissionController, SlotLease};
use crate::inventory::{NetboxTable, RefreshSummary};
use crate::queue::{PopResult, RunQueue};
use crate::resolver::HandlerResolver;
use crate::stats::{SchedulerStats, StatsSnapshot};
use crate::timer::ScheduleTimer;
use crate::worker::Worker;

/// State shared by the loop, the refresh task and the workers.
struct Shared {
    config: SchedulerConfig,
    queue: RunQueue,
    timer: Arc<ScheduleTimer>,
    admission: Arc<AdmissionController>,
    resolver: Arc<HandlerResolver>,
    types: TypeRegistry,
    inventory: NetboxTable,
    worker: Worker,
    stats: Arc<SchedulerStats>,
    netbox_source: Arc<dyn NetboxSource>,
    type_source: Arc<dyn TypeSource>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One firing of the scheduling loop.
    fn check_run_queue(self: &Arc<Self>) {
        loop {
            let now = Instant::now();
            match self.queue.pop_due_or_wait(now) {
                PopResult::Wait(wait) => {
                    self.timer.rearm(now + wait);
                    return;
                }
                PopResult::Ready { netbox, run_at } => {
                    let Some(lease) = self.admission.try_lease() else {
                        tracing::trace!(netbox_id = %netbox.id(), "No free worker slot, deferring");
                        self.queue.insert_front(netbox, run_at);
                        self.stats.record_deferred();
                        return;
                    };
                    self.stats.record_dispatch();
                    self.spawn_worker(lease, netbox);
                }
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, lease: SlotLease, first: Arc<Netbox>) {
        let span = tracing::info_span!("worker", slot = %lease.slot());
        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move { shared.run_worker(lease, first).await }.instrument(span));

        let mut workers = self.workers.lock();
        workers.retain(|h| !h.is_finished());
        workers.push(handle);
    }

    async fn run_worker(self: Arc<Self>, lease: SlotLease, first: Arc<Netbox>) {
        tracing::trace!("Worker started");
        let mut next = Some(first);
        while let Some(netbox) = next.take() {
            self.worker.poll(&netbox, self.inventory.len()).await;
            self.requeue(&netbox);

            if self.is_shutting_down() {
                break;
            }
            if let PopResult::Ready { netbox, .. } = self.queue.pop_due_or_wait(Instant::now()) {
                self.stats.record_dispatch();
                next = Some(netbox);
            }
        }
        tracing::trace!("Worker idle, releasing slot");
        drop(lease);
    }

    /// Put a polled netbox back on the queue unless it was removed meanwhile.
    fn requeue(&self, netbox: &Arc<Netbox>) {
        if netbox.is_removed() {
            tracing::debug!(netbox_id = %netbox.id(), "Netbox removed during poll, not rescheduling");
            return;
        }
        netbox.reschedule(Instant::now());
        let run_at = netbox.next_run();
        if self.queue.insert(netbox.clone(), run_at) {
            self.timer.rearm(run_at);
        }
    }

    async fn refresh_types(&self, update_netboxes: bool) -> Result<usize> {
        let defs = self.type_source.fetch_types().await?;
        let count = self.types.replace_all(defs);
        if update_netboxes {
            let updated = self.inventory.apply_types(&self.types);
            tracing::debug!(updated, "Netbox type snapshots refreshed");
        }
        tracing::info!(types = count, "Device types loaded");
        Ok(count)
    }

    async fn refresh_netboxes(&self) -> Result<RefreshSummary> {
        let records = self.netbox_source.fetch_netboxes().await?;
        let outcome = self.inventory.apply(
            records,
            &self.types,
            self.config.sysname_filter.as_deref(),
        );

        let mut wake = false;
        for netbox in &outcome.enqueue {
            wake |= self.queue.insert(netbox.clone(), netbox.next_run());
        }
        if wake {
            self.timer.wake();
        }

        self.stats.record_refresh();
        let summary = outcome.summary(self.inventory.len());
        tracing::info!(
            total = summary.total,
            added = summary.added,
            updated = summary.updated,
            replaced = summary.replaced,
            removed = summary.removed,
            unknown_type = summary.unknown_type,
            filtered = summary.filtered,
            "Netbox inventory refreshed"
        );
        Ok(summary)
    }
}

async fn run_loop(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    tracing::debug!("Scheduling loop started");
    loop {
        tokio::select! {
            _ = shared.timer.fired() => {}
            _ = shutdown.changed() => {}
        }
        if shared.is_shutting_down() {
            break;
        }
        shared.check_run_queue();
    }
    tracing::debug!("Scheduling loop stopped");
}

async fn run_refresh(shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    let period = shared.config.refresh_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {}
        }
        if shared.is_shutting_down() {
            break;
        }
        if let Err(e) = shared.refresh_types(true).await {
            tracing::warn!(error = %e, "Device type refresh failed, keeping previous types");
        }
        if let Err(e) = shared.refresh_netboxes().await {
            tracing::warn!(error = %e, "Inventory refresh failed, keeping previous netboxes");
        }
    }
}

/// Polling scheduler.
pub struct Scheduler {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: SchedulerConfig,
        netbox_source: Arc<dyn NetboxSource>,
        type_source: Arc<dyn TypeSource>,
        client: Arc<dyn ProtocolClient>,
        plugins: PluginSet,
    ) -> Result<Self> {
        config.validate()?;

        let timer = Arc::new(ScheduleTimer::new());
        let admission = {
            let timer = timer.clone();
            Arc::new(AdmissionController::new(config.max_workers).on_release(move || timer.wake()))
        };
        let resolver = Arc::new(HandlerResolver::new(plugins));
        let stats = Arc::new(SchedulerStats::new());
        let worker = Worker::new(
            resolver.clone(),
            Arc::new(PluginStorageTable::new()),
            client,
            Arc::new(config.handler_config.clone()),
            stats.clone(),
        );
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                queue: RunQueue::new(),
                timer,
                admission,
                resolver,
                types: TypeRegistry::new(),
                inventory: NetboxTable::new(),
                worker,
                stats,
                netbox_source,
                type_source,
                workers: Mutex::new(Vec::new()),
                shutdown,
            }),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Load types and inventory, then start the scheduling loop and the
    /// periodic refresh.
    ///
    /// A failing initial load is logged; the refresh task retries it.
    pub async fn start(&self) -> Result<()> {
        if self.shared.is_shutting_down() {
            return Err(Error::Scheduler("scheduler has been shut down".to_string()));
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Scheduler("scheduler already started".to_string()));
        }

        if let Err(e) = self.shared.refresh_types(false).await {
            tracing::warn!(error = %e, "Initial device type load failed");
        }
        if let Err(e) = self.shared.refresh_netboxes().await {
            tracing::warn!(error = %e, "Initial inventory load failed");
        }

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(run_loop(self.shared.clone())));
        tasks.push(tokio::spawn(run_refresh(self.shared.clone())));
        self.shared.timer.wake();

        tracing::info!(
            max_workers = self.shared.config.max_workers,
            netboxes = self.shared.inventory.len(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop the loop and the refresh task and wait for in-flight workers to
    /// finish their current netbox.
    pub async fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);

        // The loop may spawn workers until it exits; join it first.
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut results = futures::future::join_all(tasks).await;
        let workers = std::mem::take(&mut *self.shared.workers.lock());
        results.extend(futures::future::join_all(workers).await);

        for result in results {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        tracing::info!("Scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shared.is_shutting_down()
    }

    /// Reload every device type from the type source.
    ///
    /// With `update_netboxes`, live netboxes switch to the new snapshot of
    /// their type.
    pub async fn refresh_types(&self, update_netboxes: bool) -> Result<usize> {
        self.shared.refresh_types(update_netboxes).await
    }

    /// Diff the inventory against the netbox source and enqueue new netboxes.
    pub async fn refresh_netboxes(&self) -> Result<RefreshSummary> {
        self.shared.refresh_netboxes().await
    }

    /// Swap the plugin set and clear the handler resolution cache.
    pub fn reload_plugins(&self, plugins: PluginSet) {
        self.shared.resolver.reload(plugins);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn netbox(&self, netbox_id: &str) -> Option<Arc<Netbox>> {
        self.shared.inventory.get(netbox_id)
    }

    pub fn netbox_count(&self) -> usize {
        self.shared.inventory.len()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn active_workers(&self) -> usize {
        self.shared.admission.active()
    }

    pub fn resolver(&self) -> &HandlerResolver {
        &self.shared.resolver
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }
}
