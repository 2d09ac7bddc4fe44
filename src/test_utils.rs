//! # Test Utilities
//!
//! In-memory stand-ins for the backend so resolver, health and subscription
//! behavior can be exercised without a network. One [`MockBackend`] is shared by
//! every client a [`MockClientFactory`] builds, so tests can script probe results
//! and drive channel signals regardless of which client instance is current.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::{
    BackendClient, ChannelId, ChannelSignal, ChannelSpec, ChannelStatus, ClientFactory,
    ProbeRequest, ProbeResponse, RawChange, RealtimeChannel,
};
use crate::error::{ClientError, SubscriptionError};
use crate::realtime::{ChangeEvent, ChannelEventHandler};

/// How the mock answers `probe`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeBehavior {
    Status(u16),
    NetworkError,
    /// The client's own request deadline elapsed
    ClientTimeout,
    /// Never completes; exercises probe timeouts
    Hang,
}

struct LiveChannel {
    id: ChannelId,
    topic: String,
    sender: mpsc::Sender<ChannelSignal>,
}

/// Scriptable backend shared by mock clients
pub struct MockBackend {
    probe_behavior: Mutex<ProbeBehavior>,
    probes: AtomicUsize,
    connectivity: AtomicBool,
    connectivity_checks: AtomicUsize,
    open_failure: AtomicBool,
    auto_subscribe: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    channels: Mutex<Vec<LiveChannel>>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("probe_behavior", &*self.probe_behavior.lock())
            .field("opens", &self.open_count())
            .field("closes", &self.close_count())
            .finish()
    }
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            probe_behavior: Mutex::new(ProbeBehavior::Status(200)),
            probes: AtomicUsize::new(0),
            connectivity: AtomicBool::new(true),
            connectivity_checks: AtomicUsize::new(0),
            open_failure: AtomicBool::new(false),
            auto_subscribe: AtomicBool::new(true),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            channels: Mutex::new(Vec::new()),
        })
    }

    /// A client bound to this backend with a fixed endpoint and credential
    pub fn client(self: &Arc<Self>) -> Arc<dyn BackendClient> {
        Arc::new(MockClient {
            endpoint: "https://mock.backend.io".to_string(),
            credential: "mock-key".to_string(),
            backend: Arc::clone(self),
        })
    }

    pub fn set_probe_behavior(&self, behavior: ProbeBehavior) {
        *self.probe_behavior.lock() = behavior;
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn set_connectivity(&self, reachable: bool) {
        self.connectivity.store(reachable, Ordering::SeqCst);
    }

    pub fn connectivity_checks(&self) -> usize {
        self.connectivity_checks.load(Ordering::SeqCst)
    }

    /// Make every subsequent `open_channel` fail
    pub fn set_open_failure(&self, fail: bool) {
        self.open_failure.store(fail, Ordering::SeqCst);
    }

    /// Whether new channels report `Subscribed` as soon as they open (default on)
    pub fn set_auto_subscribe(&self, enabled: bool) {
        self.auto_subscribe.store(enabled, Ordering::SeqCst);
    }

    /// Every `open_channel` call, failed ones included
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn live_channels(&self) -> usize {
        self.channels.lock().len()
    }

    /// Push a signal into the newest open channel for `topic`
    pub fn emit(&self, topic: &str, signal: ChannelSignal) -> bool {
        let channels = self.channels.lock();
        channels
            .iter()
            .rev()
            .find(|c| c.topic == topic)
            .is_some_and(|c| c.sender.try_send(signal).is_ok())
    }

    pub fn emit_change(&self, topic: &str, event_type: &str, new: Value) -> bool {
        self.emit(
            topic,
            ChannelSignal::Change(RawChange {
                event_type: event_type.to_string(),
                new,
                old: Value::Null,
            }),
        )
    }

    pub fn fail_channel(&self, topic: &str, status: ChannelStatus) -> bool {
        self.emit(topic, ChannelSignal::Status(status))
    }

    fn open(&self, spec: ChannelSpec) -> Result<RealtimeChannel, ClientError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.open_failure.load(Ordering::SeqCst) {
            return Err(ClientError::Channel(format!(
                "mock refused to open {}",
                spec.name
            )));
        }

        let (sender, signals) = mpsc::channel(spec.buffer_size.max(1));
        if self.auto_subscribe.load(Ordering::SeqCst) {
            let _ = sender.try_send(ChannelSignal::Status(ChannelStatus::Subscribed));
        }
        let id = Uuid::new_v4();
        self.channels.lock().push(LiveChannel {
            id,
            topic: spec.topic,
            sender,
        });
        Ok(RealtimeChannel { id, signals })
    }

    fn close(&self, id: ChannelId) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.channels.lock().retain(|c| c.id != id);
    }
}

/// `BackendClient` backed by a shared [`MockBackend`]
#[derive(Debug)]
pub struct MockClient {
    endpoint: String,
    credential: String,
    backend: Arc<MockBackend>,
}

#[async_trait]
impl BackendClient for MockClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn credential(&self) -> &str {
        &self.credential
    }

    async fn probe(&self, _request: ProbeRequest) -> Result<ProbeResponse, ClientError> {
        self.backend.probes.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.backend.probe_behavior.lock();
        match behavior {
            ProbeBehavior::Status(status) => Ok(ProbeResponse { status }),
            ProbeBehavior::NetworkError => {
                Err(ClientError::Network("connection refused".to_string()))
            }
            ProbeBehavior::ClientTimeout => {
                Err(ClientError::Timeout("operation timed out".to_string()))
            }
            ProbeBehavior::Hang => std::future::pending().await,
        }
    }

    async fn check_connectivity(&self) -> Result<(), ClientError> {
        self.backend.connectivity_checks.fetch_add(1, Ordering::SeqCst);
        if self.backend.connectivity.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::Network("connection refused".to_string()))
        }
    }

    async fn open_channel(&self, spec: ChannelSpec) -> Result<RealtimeChannel, ClientError> {
        self.backend.open(spec)
    }

    async fn close_channel(&self, id: ChannelId) {
        self.backend.close(id);
    }
}

/// Factory producing [`MockClient`]s over one shared backend
#[derive(Debug)]
pub struct MockClientFactory {
    backend: Arc<MockBackend>,
    constructed: AtomicUsize,
    fail: AtomicBool,
}

impl MockClientFactory {
    pub fn new() -> Self {
        Self {
            backend: MockBackend::new(),
            constructed: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    /// Successful constructions so far
    pub fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }

    pub fn fail_construction(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn backend(&self) -> Arc<MockBackend> {
        Arc::clone(&self.backend)
    }
}

impl Default for MockClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for MockClientFactory {
    fn construct(
        &self,
        endpoint: &str,
        credential: &str,
    ) -> Result<Arc<dyn BackendClient>, ClientError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Construction(format!(
                "mock construction refused for {endpoint}"
            )));
        }
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockClient {
            endpoint: endpoint.to_string(),
            credential: credential.to_string(),
            backend: Arc::clone(&self.backend),
        }))
    }
}

/// Handler that records what it receives
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<ChangeEvent>>,
    errors: Mutex<Vec<SubscriptionError>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    pub fn errors(&self) -> Vec<SubscriptionError> {
        self.errors.lock().clone()
    }
}

impl ChannelEventHandler for RecordingHandler {
    fn handle_change(&self, event: ChangeEvent) {
        self.events.lock().push(event);
    }

    fn handle_channel_error(&self, error: &SubscriptionError) {
        self.errors.lock().push(error.clone());
    }
}
