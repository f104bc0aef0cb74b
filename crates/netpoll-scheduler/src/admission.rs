//! Worker admission control.
//!
//! The controller hands out at most `max_workers` slots. Slot ids are reused
//! smallest-first, so with 16 workers the labels are always `00` to `15`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// An acquired worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    id: usize,
    width: usize,
}

impl SlotId {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Zero-padded label used in logs.
    pub fn label(&self) -> String {
        format!("{:0width$}", self.id, width = self.width)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.id, width = self.width)
    }
}

fn digits(mut n: usize) -> usize {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

type ReleaseHook = Box<dyn Fn() + Send + Sync>;

/// Bounds the number of concurrently active workers.
pub struct AdmissionController {
    max_workers: usize,
    label_width: usize,
    active: Mutex<BTreeSet<usize>>,
    on_release: Option<ReleaseHook>,
}

impl AdmissionController {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            label_width: digits(max_workers.saturating_sub(1)),
            active: Mutex::new(BTreeSet::new()),
            on_release: None,
        }
    }

    /// Call `hook` every time a slot is released.
    pub fn on_release(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of slots currently held.
    pub fn active(&self) -> usize {
        self.active.lock().len()
    }

    pub fn available(&self) -> usize {
        self.max_workers.saturating_sub(self.active())
    }

    /// Take the smallest free slot, or `None` if every slot is held.
    pub fn try_acquire(&self) -> Option<SlotId> {
        let mut active = self.active.lock();
        if active.len() >= self.max_workers {
            return None;
        }
        let id = (0..self.max_workers).find(|id| !active.contains(id))?;
        active.insert(id);
        Some(SlotId {
            id,
            width: self.label_width,
        })
    }

    /// Return a slot. Returns false if it was not held.
    pub fn release(&self, slot: SlotId) -> bool {
        let released = self.active.lock().remove(&slot.id);
        if released {
            tracing::trace!(slot = %slot, "Worker slot released");
            if let Some(hook) = &self.on_release {
                hook();
            }
        } else {
            tracing::warn!(slot = %slot, "Released a slot that was not held");
        }
        released
    }

    /// Acquire a slot wrapped in a guard that releases it on drop.
    pub fn try_lease(self: &Arc<Self>) -> Option<SlotLease> {
        let slot = self.try_acquire()?;
        Some(SlotLease {
            controller: Arc::clone(self),
            slot,
        })
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("max_workers", &self.max_workers)
            .field("active", &self.active())
            .finish()
    }
}

/// A held slot. Dropping the lease releases the slot, also when the worker
/// holding it panics.
#[derive(Debug)]
pub struct SlotLease {
    controller: Arc<AdmissionController>,
    slot: SlotId,
}

impl SlotLease {
    pub fn slot(&self) -> SlotId {
        self.slot
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.controller.release(self.slot);
    }
}
