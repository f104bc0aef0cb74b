//! Shared test fixtures: recording plugins, a mutable source and a no-op
//! protocol client.

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netpoll_core::prelude::*;
use netpoll_core::{
    AttributeDef, DeviceType, DeviceTypeDef, NetboxRecord, NetboxSource, Rows, SourceError,
    TypeSource,
};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("netpoll_scheduler=debug")
        .with_test_writer()
        .try_init();
}

pub fn type_def(type_id: &str, frequency_secs: u64) -> DeviceTypeDef {
    DeviceTypeDef {
        type_id: type_id.to_string(),
        frequency_secs,
        attributes: vec![AttributeDef {
            key: "ifDescr".to_string(),
            query: "1.3.6.1.2.1.2.2.1.2".to_string(),
            frequency_secs: None,
        }],
    }
}

pub fn record(netbox_id: &str, type_id: &str) -> NetboxRecord {
    NetboxRecord::new(netbox_id, format!("192.0.2.{netbox_id}"), type_id)
        .with_sysname(format!("sw-{netbox_id}.example.org"))
}

pub fn netbox(netbox_id: &str) -> Arc<Netbox> {
    let t = DeviceType::new("generic", Duration::from_secs(300)).with_attribute(
        "ifDescr",
        "1.3.6.1.2.1.2.2.1.2",
        None,
    );
    Arc::new(Netbox::new(record(netbox_id, "generic"), Arc::new(t), 1))
}

/// Protocol client that answers every query with no rows.
pub struct NullClient;

#[async_trait]
impl ProtocolClient for NullClient {
    async fn get_all(&self, _netbox: &Netbox, _query: &QueryDescriptor) -> Result<Rows, ProtocolError> {
        Ok(Vec::new())
    }
}

/// Inventory and type source whose contents tests can change.
#[derive(Default)]
pub struct TestSource {
    pub netboxes: Mutex<Vec<NetboxRecord>>,
    pub types: Mutex<Vec<DeviceTypeDef>>,
    pub unavailable: AtomicBool,
}

impl TestSource {
    pub fn new(netboxes: Vec<NetboxRecord>, types: Vec<DeviceTypeDef>) -> Arc<Self> {
        Arc::new(Self {
            netboxes: Mutex::new(netboxes),
            types: Mutex::new(types),
            unavailable: AtomicBool::new(false),
        })
    }

    pub fn set_netboxes(&self, netboxes: Vec<NetboxRecord>) {
        *self.netboxes.lock() = netboxes;
    }
}

#[async_trait]
impl NetboxSource for TestSource {
    async fn fetch_netboxes(&self) -> Result<Vec<NetboxRecord>, SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("inventory database".to_string()));
        }
        Ok(self.netboxes.lock().clone())
    }
}

#[async_trait]
impl TypeSource for TestSource {
    async fn fetch_types(&self) -> Result<Vec<DeviceTypeDef>, SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("inventory database".to_string()));
        }
        Ok(self.types.lock().clone())
    }
}

/// Container recording which device handlers wrote to it.
pub struct TestContainer {
    name: String,
    pub written_by: Vec<String>,
    committed: CommitFlag,
}

impl TestContainer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            written_by: Vec::new(),
            committed: CommitFlag::new(),
        }
    }
}

impl DataContainer for TestContainer {
    fn name(&self) -> &str {
        &self.name
    }
    fn commit(&mut self) {
        self.committed.set();
    }
    fn is_committed(&self) -> bool {
        self.committed.is_set()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// What a [`TestHandler`] does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Timeout,
    Fail,
    Obsolete,
    Panic,
}

/// One device handler invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub handler: String,
    pub netbox_id: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Invocations shared by several handlers, plus a concurrency high-water mark.
#[derive(Default)]
pub struct PollLog {
    invocations: Mutex<Vec<Invocation>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl PollLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub fn netbox_order(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.netbox_id).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self, invocation: Invocation) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.invocations.lock().push(invocation);
    }
}

/// Device handler with a fixed answer to `can_handle` and a fixed behavior.
pub struct TestHandler {
    name: String,
    confidence: HandleConfidence,
    behavior: Behavior,
    delay: Duration,
    can_handle_error: bool,
    can_handle_panic: bool,
    can_handle_calls: AtomicUsize,
    log: Arc<PollLog>,
}

impl TestHandler {
    pub fn new(name: &str, confidence: HandleConfidence, log: Arc<PollLog>) -> Self {
        Self {
            name: name.to_string(),
            confidence,
            behavior: Behavior::Succeed,
            delay: Duration::ZERO,
            can_handle_error: false,
            can_handle_panic: false,
            can_handle_calls: AtomicUsize::new(0),
            log,
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_can_handle(mut self) -> Self {
        self.can_handle_error = true;
        self
    }

    pub fn panicking_can_handle(mut self) -> Self {
        self.can_handle_panic = true;
        self
    }

    pub fn can_handle_calls(&self) -> usize {
        self.can_handle_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceHandler for TestHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, _netbox: &Netbox) -> Result<HandleConfidence, HandlerError> {
        self.can_handle_calls.fetch_add(1, Ordering::SeqCst);
        if self.can_handle_panic {
            panic!("{} lost its OID table", self.name);
        }
        if self.can_handle_error {
            return Err(HandlerError::Failed("plugin state corrupt".to_string()));
        }
        Ok(self.confidence)
    }

    async fn handle(
        &self,
        netbox: &Netbox,
        _client: &dyn ProtocolClient,
        _config: &Value,
        containers: &mut DataContainers,
    ) -> Result<(), HandlerError> {
        self.log.enter();
        let started = Instant::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(container) = containers.get_mut::<TestContainer>() {
            container.written_by.push(self.name.clone());
            if self.behavior == Behavior::Succeed {
                container.commit();
            }
        }
        self.log.leave(Invocation {
            handler: self.name.clone(),
            netbox_id: netbox.id().to_string(),
            started,
            finished: Instant::now(),
        });

        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Timeout => Err(ProtocolError::Timeout { target: netbox.ip() }.into()),
            Behavior::Fail => Err(HandlerError::Failed("unexpected response".to_string())),
            Behavior::Obsolete => Err(HandlerError::ObsoleteInterface(self.name.clone())),
            Behavior::Panic => panic!("index out of bounds in {}", self.name),
        }
    }
}

/// One data handler persist call.
#[derive(Debug, Clone)]
pub struct PersistCall {
    pub netbox_id: String,
    pub committed: bool,
    pub written_by: Vec<String>,
}

/// Data handler recording init and persist calls.
pub struct TestDataHandler {
    name: String,
    init_calls: AtomicUsize,
    init_failures_left: AtomicUsize,
    fail_persist: bool,
    panic_persist: bool,
    persisted: Mutex<Vec<PersistCall>>,
}

impl TestDataHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            init_calls: AtomicUsize::new(0),
            init_failures_left: AtomicUsize::new(0),
            fail_persist: false,
            panic_persist: false,
            persisted: Mutex::new(Vec::new()),
        }
    }

    /// Fail storage init this many times before succeeding.
    pub fn with_init_failures(self, count: usize) -> Self {
        self.init_failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_persist(mut self) -> Self {
        self.fail_persist = true;
        self
    }

    pub fn panicking_persist(mut self) -> Self {
        self.panic_persist = true;
        self
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn persisted(&self) -> Vec<PersistCall> {
        self.persisted.lock().clone()
    }
}

#[async_trait]
impl DataHandler for TestDataHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init_persistent_storage(&self, storage: &PluginStorage) -> Result<(), PersistError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.init_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.init_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(PersistError::Storage("connection refused".to_string()));
        }
        storage.set("ready", Value::Bool(true));
        Ok(())
    }

    fn container_factory(&self) -> Box<dyn DataContainer> {
        Box::new(TestContainer::new(&self.name))
    }

    async fn persist(
        &self,
        netbox: &Netbox,
        container: &dyn DataContainer,
        changes: &ChangeSet,
        _storage: &PluginStorage,
    ) -> Result<(), PersistError> {
        let container = container
            .as_any()
            .downcast_ref::<TestContainer>()
            .ok_or_else(|| PersistError::ContainerMismatch(container.name().to_string()))?;

        self.persisted.lock().push(PersistCall {
            netbox_id: netbox.id().to_string(),
            committed: container.is_committed(),
            written_by: container.written_by.clone(),
        });
        if container.is_committed() {
            changes.record(format!("{}:{}", netbox.id(), self.name), Change::Updated);
        }

        if self.panic_persist {
            panic!("{} persist bug", self.name);
        }
        if self.fail_persist {
            return Err(PersistError::Storage("deadlock detected".to_string()));
        }
        Ok(())
    }
}
