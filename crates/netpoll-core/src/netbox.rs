//! Netbox records and their poll schedule.
//!
//! A [`Netbox`] is shared between the inventory table, the run queue and the
//! worker polling it. Its descriptive data and its type are immutable
//! snapshots that a refresh swaps as a whole; only the poll schedule and the
//! removed flag change in place.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::device_type::{DeviceType, QueryDescriptor};

/// Maximum number of explicit retry requests per attribute.
pub const MAX_RETRIES: u8 = 3;

/// Backoff delay for the given retry count (1 = 30s, 2 = 60s, 3 = 120s).
pub fn retry_delay(count: u8) -> Option<Duration> {
    match count {
        1 => Some(Duration::from_secs(30)),
        2 => Some(Duration::from_secs(60)),
        3 => Some(Duration::from_secs(120)),
        _ => None,
    }
}

/// Descriptive data for a netbox as delivered by the inventory source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetboxRecord {
    /// Stable external key
    pub netbox_id: String,
    /// Management address
    pub ip: String,
    /// Read community
    #[serde(default)]
    pub community_ro: String,
    /// Device type identifier
    pub type_id: String,
    /// Human-readable type name
    #[serde(default)]
    pub type_name: String,
    /// Category (e.g. `SW`, `GW`)
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub sysname: String,
}

impl NetboxRecord {
    pub fn new(netbox_id: impl Into<String>, ip: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            netbox_id: netbox_id.into(),
            ip: ip.into(),
            community_ro: String::new(),
            type_id: type_id.into(),
            type_name: String::new(),
            category: String::new(),
            sysname: String::new(),
        }
    }

    pub fn with_sysname(mut self, sysname: impl Into<String>) -> Self {
        self.sysname = sysname.into();
        self
    }

    pub fn with_community(mut self, community: impl Into<String>) -> Self {
        self.community_ro = community.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RetryState {
    count: u8,
    due: Option<Instant>,
}

/// Per-attribute due times and retry backoff.
#[derive(Debug)]
struct PollSchedule {
    next_due: HashMap<String, Instant>,
    retries: HashMap<String, RetryState>,
}

impl PollSchedule {
    fn new(device_type: &DeviceType, now: Instant) -> Self {
        Self {
            next_due: device_type
                .attributes()
                .keys()
                .map(|k| (k.clone(), now))
                .collect(),
            retries: HashMap::new(),
        }
    }

    fn next_run(&self) -> Option<Instant> {
        self.next_due
            .values()
            .copied()
            .chain(self.retries.values().filter_map(|r| r.due))
            .min()
    }

    fn is_due(&self, key: &str, now: Instant) -> bool {
        let scheduled = self.next_due.get(key).is_none_or(|due| *due <= now);
        let retry = self
            .retries
            .get(key)
            .and_then(|r| r.due)
            .is_some_and(|due| due <= now);
        scheduled || retry
    }

    fn reschedule(&mut self, device_type: &DeviceType, now: Instant) {
        self.next_due
            .retain(|key, _| device_type.attributes().contains_key(key));
        for (key, spec) in device_type.attributes() {
            let due = self.next_due.entry(key.clone()).or_insert(now);
            if *due <= now {
                *due = now + spec.interval;
            }
        }

        for retry in self.retries.values_mut() {
            if retry.due.is_some_and(|due| due <= now) {
                retry.due = None;
            }
        }
        self.retries
            .retain(|_, r| r.count > 0 || r.due.is_some());
    }

    fn request_retry(&mut self, key: &str, now: Instant) -> Option<Duration> {
        let retry = self.retries.entry(key.to_string()).or_default();
        if retry.count >= MAX_RETRIES {
            return None;
        }
        retry.count += 1;
        let delay = retry_delay(retry.count)?;
        let due = now + delay;
        // A deadline that already passed belongs to the retry being served now
        let pending = retry.due.filter(|d| *d > now);
        retry.due = Some(pending.map_or(due, |d| d.min(due)));
        Some(delay)
    }

    fn mark_handled(&mut self, key: &str) {
        self.retries.remove(key);
    }
}

/// A polled device.
pub struct Netbox {
    id: String,
    seq: AtomicU64,
    record: RwLock<Arc<NetboxRecord>>,
    device_type: RwLock<Arc<DeviceType>>,
    schedule: Mutex<PollSchedule>,
    removed: AtomicBool,
}

impl Netbox {
    /// Create a netbox with every attribute due immediately.
    pub fn new(record: NetboxRecord, device_type: Arc<DeviceType>, seq: u64) -> Self {
        let schedule = PollSchedule::new(&device_type, Instant::now());
        Self {
            id: record.netbox_id.clone(),
            seq: AtomicU64::new(seq),
            record: RwLock::new(Arc::new(record)),
            device_type: RwLock::new(device_type),
            schedule: Mutex::new(schedule),
            removed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Position of the netbox within the current polling round.
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    pub fn set_seq(&self, seq: u64) {
        self.seq.store(seq, Ordering::Relaxed);
    }

    /// Current descriptive snapshot.
    pub fn record(&self) -> Arc<NetboxRecord> {
        self.record.read().clone()
    }

    /// Swap in a new descriptive snapshot. Returns false if nothing changed.
    pub fn replace_record(&self, record: NetboxRecord) -> bool {
        debug_assert_eq!(record.netbox_id, self.id);
        let mut current = self.record.write();
        if **current == record {
            return false;
        }
        *current = Arc::new(record);
        true
    }

    pub fn sysname(&self) -> String {
        self.record.read().sysname.clone()
    }

    pub fn ip(&self) -> String {
        self.record.read().ip.clone()
    }

    /// Current type snapshot.
    pub fn device_type(&self) -> Arc<DeviceType> {
        self.device_type.read().clone()
    }

    /// Swap in a reloaded snapshot of the same type.
    pub fn set_device_type(&self, device_type: Arc<DeviceType>) {
        *self.device_type.write() = device_type;
    }

    pub fn type_id(&self) -> String {
        self.device_type.read().type_id().to_string()
    }

    /// True if the netbox's type defines every one of `keys`.
    pub fn is_supported<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        self.device_type().supports_all(keys)
    }

    /// Query descriptor for an attribute.
    pub fn query(&self, key: &str) -> Option<QueryDescriptor> {
        self.device_type().attribute(key).map(|a| a.query.clone())
    }

    /// True if the attribute is due for polling, either by interval or by a
    /// pending retry.
    pub fn is_due(&self, key: &str) -> bool {
        if self.device_type().attribute(key).is_none() {
            return false;
        }
        self.schedule.lock().is_due(key, Instant::now())
    }

    /// Earliest time any attribute or pending retry becomes due.
    pub fn next_run(&self) -> Instant {
        let fallback = self.device_type().frequency();
        self.schedule
            .lock()
            .next_run()
            .unwrap_or_else(|| Instant::now() + fallback)
    }

    /// Advance every attribute that was due at `now` by its interval and drop
    /// retries that have fired.
    pub fn reschedule(&self, now: Instant) {
        let device_type = self.device_type();
        self.schedule.lock().reschedule(&device_type, now);
    }

    /// Ask for an attribute to be polled again soon.
    ///
    /// Returns the backoff delay, or `None` once [`MAX_RETRIES`] requests have
    /// been made without a successful poll in between.
    pub fn request_retry(&self, key: &str) -> Option<Duration> {
        let delay = self.schedule.lock().request_retry(key, Instant::now());
        match delay {
            Some(d) => tracing::debug!(netbox_id = %self.id, key, delay_secs = d.as_secs(), "Retry scheduled"),
            None => tracing::debug!(netbox_id = %self.id, key, "Retry limit reached"),
        }
        delay
    }

    /// Record a successful poll of an attribute, resetting its retry counter.
    pub fn mark_handled(&self, key: &str) {
        self.schedule.lock().mark_handled(key);
    }

    /// Number of retry requests since the attribute was last handled.
    pub fn retry_count(&self, key: &str) -> u8 {
        self.schedule
            .lock()
            .retries
            .get(key)
            .map_or(0, |r| r.count)
    }

    /// Mark the netbox as removed. Queued entries are dropped lazily and an
    /// in-flight poll is not rescheduled.
    pub fn remove(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Netbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Netbox")
            .field("id", &self.id)
            .field("seq", &self.seq())
            .field("type_id", &self.type_id())
            .field("removed", &self.is_removed())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for Netbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let record = self.record();
        if record.sysname.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", record.sysname, self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device_type() -> Arc<DeviceType> {
        Arc::new(
            DeviceType::new("c2950", Duration::from_secs(300))
                .with_attribute("ifDescr", "1.3.6.1.2.1.2.2.1.2", None)
                .with_attribute("ifVlan", "1.3.6.1.4.1.9.9.68.1.2.2.1.2", Some(Duration::from_secs(60))),
        )
    }

    fn netbox() -> Netbox {
        Netbox::new(
            NetboxRecord::new("42", "10.0.0.1", "c2950").with_sysname("sw-1"),
            device_type(),
            1,
        )
    }

    #[test]
    fn test_retry_delays() {
        assert_eq!(retry_delay(1), Some(Duration::from_secs(30)));
        assert_eq!(retry_delay(2), Some(Duration::from_secs(60)));
        assert_eq!(retry_delay(3), Some(Duration::from_secs(120)));
        assert_eq!(retry_delay(4), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_netbox_is_due_now() {
        let nb = netbox();
        assert!(nb.next_run() <= Instant::now());
        assert!(nb.is_due("ifDescr"));
        assert!(!nb.is_due("unknown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_uses_shortest_interval() {
        let nb = netbox();
        let now = Instant::now();
        nb.reschedule(now);
        assert_eq!(nb.next_run(), now + Duration::from_secs(60));
        assert!(!nb.is_due("ifVlan"));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(nb.is_due("ifVlan"));
        assert!(!nb.is_due("ifDescr"));

        let later = Instant::now();
        nb.reschedule(later);
        // ifDescr keeps its original due time, ifVlan moves forward
        assert_eq!(nb.next_run(), later + Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_counter_backoff_and_reset() {
        let nb = netbox();
        let start = Instant::now();
        nb.reschedule(start);

        assert_eq!(nb.request_retry("ifDescr"), Some(Duration::from_secs(30)));
        assert_eq!(nb.request_retry("ifDescr"), Some(Duration::from_secs(60)));
        assert_eq!(nb.request_retry("ifDescr"), Some(Duration::from_secs(120)));
        assert_eq!(nb.request_retry("ifDescr"), None);
        assert_eq!(nb.retry_count("ifDescr"), 3);

        // The earliest pending retry wins over the 60s interval
        assert_eq!(nb.next_run(), start + Duration::from_secs(30));

        nb.mark_handled("ifDescr");
        assert_eq!(nb.retry_count("ifDescr"), 0);
        assert_eq!(nb.request_retry("ifDescr"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_replace_record_detects_changes() {
        let nb = netbox();
        let same = NetboxRecord::new("42", "10.0.0.1", "c2950").with_sysname("sw-1");
        assert!(!nb.replace_record(same));

        let moved = NetboxRecord::new("42", "10.0.0.2", "c2950").with_sysname("sw-1");
        assert!(nb.replace_record(moved));
        assert_eq!(nb.ip(), "10.0.0.2");
        assert_eq!(nb.to_string(), "sw-1 (42)");
    }
}
