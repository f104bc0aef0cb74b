//! Run queue tests.
//!
//! Ordering, tie-breaking, priority re-insertion and lazy removal.

mod common;

use std::time::Duration;

use netpoll_scheduler::queue::{PopResult, RunQueue};
use tokio::time::Instant;

fn pop_id(queue: &RunQueue, now: Instant) -> Option<String> {
    match queue.pop_due_or_wait(now) {
        PopResult::Ready { netbox, .. } => Some(netbox.id().to_string()),
        PopResult::Wait(_) => None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_equal_timestamps_served_fifo() {
    let queue = RunQueue::new();
    let now = Instant::now();
    for id in ["a", "b", "c"] {
        queue.insert(common::netbox(id), now);
    }

    assert_eq!(pop_id(&queue, now).as_deref(), Some("a"));
    assert_eq!(pop_id(&queue, now).as_deref(), Some("b"));
    assert_eq!(pop_id(&queue, now).as_deref(), Some("c"));
    assert!(pop_id(&queue, now).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_earlier_timestamp_first() {
    let queue = RunQueue::new();
    let now = Instant::now();
    queue.insert(common::netbox("late"), now + Duration::from_secs(2));
    queue.insert(common::netbox("early"), now + Duration::from_secs(1));

    let later = now + Duration::from_secs(5);
    assert_eq!(pop_id(&queue, later).as_deref(), Some("early"));
    assert_eq!(pop_id(&queue, later).as_deref(), Some("late"));
}

#[tokio::test(start_paused = true)]
async fn test_removed_netbox_never_popped() {
    let queue = RunQueue::new();
    let now = Instant::now();
    let a = common::netbox("a");
    let b = common::netbox("b");
    let c = common::netbox("c");
    queue.insert(a, now);
    queue.insert(b.clone(), now);
    queue.insert(c, now);

    b.remove();

    assert_eq!(pop_id(&queue, now).as_deref(), Some("a"));
    assert_eq!(pop_id(&queue, now).as_deref(), Some("c"));
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_insert_front_keeps_place() {
    let queue = RunQueue::new();
    let now = Instant::now();
    queue.insert(common::netbox("a"), now);
    queue.insert(common::netbox("b"), now);

    // Pop "a", pretend no slot was free and put it back
    let PopResult::Ready { netbox, run_at } = queue.pop_due_or_wait(now) else {
        panic!("expected a due netbox");
    };
    assert_eq!(run_at, now);
    queue.insert_front(netbox, run_at);

    assert_eq!(pop_id(&queue, now).as_deref(), Some("a"));
    assert_eq!(pop_id(&queue, now).as_deref(), Some("b"));
}

#[tokio::test(start_paused = true)]
async fn test_wait_until_head_due() {
    let queue = RunQueue::new();
    let now = Instant::now();
    queue.insert(common::netbox("a"), now + Duration::from_millis(1500));

    match queue.pop_due_or_wait(now + Duration::from_millis(500)) {
        PopResult::Wait(wait) => assert_eq!(wait, Duration::from_secs(1)),
        PopResult::Ready { .. } => panic!("netbox is not due yet"),
    }
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.peek_next_run(), Some(now + Duration::from_millis(1500)));

    queue.clear();
    assert!(queue.is_empty());
}
