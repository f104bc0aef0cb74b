//! Scheduler statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Live counters, updated by the loop and the workers.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    dispatched: AtomicU64,
    deferred: AtomicU64,
    cycles: AtomicU64,
    unhandled: AtomicU64,
    handler_timeouts: AtomicU64,
    handler_failures: AtomicU64,
    obsolete_plugins: AtomicU64,
    persist_failures: AtomicU64,
    storage_init_failures: AtomicU64,
    last_cycle_ms: AtomicU64,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Netboxes handed to a worker by the scheduling loop
    pub dispatched: u64,
    /// Due netboxes put back because no slot was free
    pub deferred: u64,
    /// Completed poll cycles
    pub cycles: u64,
    /// Cycles where no device handler applied
    pub unhandled: u64,
    pub handler_timeouts: u64,
    pub handler_failures: u64,
    pub obsolete_plugins: u64,
    pub persist_failures: u64,
    pub storage_init_failures: u64,
    /// Duration of the most recent cycle
    pub last_cycle_ms: u64,
    /// Time of the last successful inventory refresh
    pub last_refresh: Option<DateTime<Utc>>,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle(&self, elapsed: Duration) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_unhandled(&self) {
        self.unhandled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_timeout(&self) {
        self.handler_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_obsolete_plugin(&self) {
        self.obsolete_plugins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_init_failure(&self) {
        self.storage_init_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        *self.last_refresh.write() = Some(Utc::now());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            handler_timeouts: self.handler_timeouts.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            obsolete_plugins: self.obsolete_plugins.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            storage_init_failures: self.storage_init_failures.load(Ordering::Relaxed),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
            last_refresh: *self.last_refresh.read(),
        }
    }
}
