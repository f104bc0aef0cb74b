//! Re-armable one-shot timer driving the scheduling loop.
//!
//! At most one firing is pending. Re-arming to an earlier time replaces the
//! pending deadline; re-arming to a later one while an earlier firing is
//! still pending keeps the earlier one, so a wake-up requested by a worker is
//! never pushed back by the loop's own re-arm. The loop may compute its wait
//! just before a worker inserts a new queue head; replacing unconditionally
//! would then lose the worker's wake-up. An early firing costs one extra
//! queue check, after which the loop re-arms for the real wait.

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct ScheduleTimer {
    deadline: Mutex<Option<Instant>>,
    changed: Notify,
}

impl ScheduleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a firing at `at`.
    pub fn rearm(&self, at: Instant) {
        {
            let mut deadline = self.deadline.lock();
            match *deadline {
                Some(pending) if pending <= at => return,
                _ => *deadline = Some(at),
            }
        }
        self.changed.notify_one();
    }

    /// Schedule an immediate firing.
    pub fn wake(&self) {
        self.rearm(Instant::now());
    }

    /// Pending deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }

    /// Wait for the pending deadline and consume it.
    pub async fn fired(&self) {
        loop {
            let deadline = *self.deadline.lock();
            match deadline {
                None => self.changed.notified().await,
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.changed.notified() => continue,
                    }
                    let mut pending = self.deadline.lock();
                    if pending.is_some_and(|p| p <= Instant::now()) {
                        *pending = None;
                        return;
                    }
                }
            }
        }
    }
}
