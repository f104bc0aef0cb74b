//! Time-ordered run queue of netboxes.
//!
//! Entries are grouped by their scheduled run time. Netboxes sharing a run
//! time are served FIFO, and a netbox that could not be dispatched goes back
//! to the head of its bucket so it keeps its place. Removed netboxes are not
//! taken out eagerly; they are dropped when they reach the head.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use netpoll_core::Netbox;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Wait reported by an empty queue (`i32::MAX` milliseconds).
pub const EMPTY_QUEUE_WAIT: Duration = Duration::from_millis(i32::MAX as u64);

/// Result of [`RunQueue::pop_due_or_wait`].
#[derive(Debug)]
pub enum PopResult {
    /// The head entry was due and has been taken off the queue.
    Ready { netbox: Arc<Netbox>, run_at: Instant },
    /// Nothing is due; the head becomes due after this long.
    Wait(Duration),
}

#[derive(Default)]
struct QueueInner {
    buckets: BTreeMap<Instant, VecDeque<Arc<Netbox>>>,
    len: usize,
}

impl QueueInner {
    fn head(&self) -> Option<Instant> {
        self.buckets.keys().next().copied()
    }
}

/// Run queue keyed by scheduled run time.
#[derive(Default)]
pub struct RunQueue {
    inner: Mutex<QueueInner>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a netbox to the bucket for `run_at`.
    ///
    /// Returns true if the netbox is now the earliest entry, meaning the
    /// scheduling loop should be woken.
    pub fn insert(&self, netbox: Arc<Netbox>, run_at: Instant) -> bool {
        let mut inner = self.inner.lock();
        let is_head = inner.head().is_none_or(|head| run_at < head);
        inner.buckets.entry(run_at).or_default().push_back(netbox);
        inner.len += 1;
        is_head
    }

    /// Put a netbox at the front of the bucket for `run_at`.
    pub fn insert_front(&self, netbox: Arc<Netbox>, run_at: Instant) -> bool {
        let mut inner = self.inner.lock();
        let is_head = inner.head().is_none_or(|head| run_at <= head);
        inner.buckets.entry(run_at).or_default().push_front(netbox);
        inner.len += 1;
        is_head
    }

    /// Take the earliest netbox if it is due at `now`, otherwise report how
    /// long until it is. Removed netboxes are discarded on the way.
    pub fn pop_due_or_wait(&self, now: Instant) -> PopResult {
        let mut guard = self.inner.lock();
        let QueueInner { buckets, len } = &mut *guard;

        loop {
            let Some(mut bucket) = buckets.first_entry() else {
                return PopResult::Wait(EMPTY_QUEUE_WAIT);
            };
            let run_at = *bucket.key();
            let entries = bucket.get_mut();

            while let Some(netbox) = entries.front() {
                if !netbox.is_removed() {
                    break;
                }
                tracing::trace!(netbox_id = %netbox.id(), "Dropping removed netbox from run queue");
                entries.pop_front();
                *len -= 1;
            }

            if entries.is_empty() {
                bucket.remove();
                continue;
            }

            if run_at > now {
                return PopResult::Wait(run_at - now);
            }

            let Some(netbox) = entries.pop_front() else {
                continue;
            };
            *len -= 1;
            if entries.is_empty() {
                bucket.remove();
            }
            return PopResult::Ready { netbox, run_at };
        }
    }

    /// Scheduled time of the earliest entry, removed or not.
    pub fn peek_next_run(&self) -> Option<Instant> {
        self.inner.lock().head()
    }

    /// Number of entries, including removed netboxes not yet dropped.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().len == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.buckets.clear();
        inner.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpoll_core::{DeviceType, NetboxRecord};

    fn netbox(id: &str) -> Arc<Netbox> {
        let t = DeviceType::new("t", Duration::from_secs(60)).with_attribute("a", "1.3.6", None);
        Arc::new(Netbox::new(NetboxRecord::new(id, "192.0.2.1", "t"), Arc::new(t), 0))
    }

    fn ready_id(result: PopResult) -> String {
        match result {
            PopResult::Ready { netbox, .. } => netbox.id().to_string(),
            PopResult::Wait(d) => panic!("expected a ready netbox, got wait {d:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_reports_long_wait() {
        let queue = RunQueue::new();
        assert!(matches!(
            queue.pop_due_or_wait(Instant::now()),
            PopResult::Wait(d) if d == EMPTY_QUEUE_WAIT
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_does_not_mutate() {
        let queue = RunQueue::new();
        let now = Instant::now();
        queue.insert(netbox("1"), now + Duration::from_secs(5));

        assert!(matches!(queue.pop_due_or_wait(now), PopResult::Wait(d) if d == Duration::from_secs(5)));
        assert_eq!(queue.len(), 1);
        assert_eq!(ready_id(queue.pop_due_or_wait(now + Duration::from_secs(5))), "1");
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_reports_new_head() {
        let queue = RunQueue::new();
        let now = Instant::now();
        assert!(queue.insert(netbox("1"), now + Duration::from_secs(10)));
        assert!(!queue.insert(netbox("2"), now + Duration::from_secs(10)));
        assert!(!queue.insert(netbox("3"), now + Duration::from_secs(20)));
        assert!(queue.insert(netbox("4"), now));
        assert!(queue.insert_front(netbox("5"), now));
        assert_eq!(queue.peek_next_run(), Some(now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_head_does_not_hide_wait() {
        let queue = RunQueue::new();
        let now = Instant::now();
        let gone = netbox("gone");
        queue.insert(gone.clone(), now);
        queue.insert(netbox("later"), now + Duration::from_secs(3));
        gone.remove();

        assert!(matches!(queue.pop_due_or_wait(now), PopResult::Wait(d) if d == Duration::from_secs(3)));
        assert_eq!(queue.len(), 1);
    }
}
