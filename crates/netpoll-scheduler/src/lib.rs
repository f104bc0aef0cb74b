//! Polling scheduler and plugin dispatch for netboxes.
//!
//! Provides:
//! - A time-ordered run queue with FIFO tie-breaking and lazy removal
//! - Bounded worker admission with reusable slot ids
//! - The scheduling loop and work-stealing workers
//! - Device handler resolution with a per-netbox cache
//! - Periodic inventory and device type refresh

pub mod admission;
pub mod inventory;
pub mod queue;
pub mod resolver;
pub mod scheduler;
pub mod stats;
pub mod timer;
pub mod worker;

// Re-exports
pub use admission::{AdmissionController, SlotId, SlotLease};

pub use inventory::{sysname_matches, NetboxTable, RefreshOutcome, RefreshSummary};

pub use queue::{PopResult, RunQueue, EMPTY_QUEUE_WAIT};

pub use resolver::{HandlerResolver, ResolvedHandlers};

pub use scheduler::Scheduler;

pub use stats::{SchedulerStats, StatsSnapshot};

pub use timer::ScheduleTimer;

pub use worker::{CycleOutcome, Worker};
