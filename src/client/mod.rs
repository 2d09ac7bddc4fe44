//! # Backend Client Contract
//!
//! The connectivity layer never speaks a wire protocol directly. It talks to a
//! [`BackendClient`] built by a [`ClientFactory`] from the resolved endpoint and
//! credential:
//!
//! - `probe` / `check_connectivity`: request/response reachability checks
//! - `open_channel` / `close_channel`: realtime change feeds, delivered as a typed
//!   stream of [`ChannelSignal`]s instead of status and change callbacks
//!
//! [`HttpBackendClient`] is the reqwest implementation. Its realtime side is
//! delegated to a pluggable [`RealtimeTransport`].

pub mod http;

pub use http::{HttpBackendClient, HttpClientFactory};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ClientError;

/// Identifies one underlying channel instance (a reconnect gets a new id)
pub type ChannelId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    Head,
    Get,
}

/// Lightweight reachability request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub path: String,
    pub method: ProbeMethod,
    /// Extra headers on top of the client's credential headers
    pub headers: Vec<(String, String)>,
}

impl ProbeRequest {
    pub fn head(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: ProbeMethod::Head,
            headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
}

/// Row-level change types a channel can be filtered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    #[serde(rename = "*")]
    All,
    Insert,
    Update,
    Delete,
}

impl ChangeType {
    /// Parse a transport event name, case-insensitive
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "*" => Some(ChangeType::All),
            "INSERT" => Some(ChangeType::Insert),
            "UPDATE" => Some(ChangeType::Update),
            "DELETE" => Some(ChangeType::Delete),
            _ => None,
        }
    }
}

/// What to open: one topic, an optional server-side filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub name: String,
    pub topic: String,
    pub filter: Option<String>,
    pub events: ChangeType,
    /// Requested bound for the signal buffer
    pub buffer_size: usize,
}

/// Channel lifecycle as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

/// Change payload as it arrives from the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Status(ChannelStatus),
    Change(RawChange),
}

/// An open channel: its id plus the ordered stream of signals
pub struct RealtimeChannel {
    pub id: ChannelId,
    pub signals: mpsc::Receiver<ChannelSignal>,
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("id", &self.id)
            .finish()
    }
}

/// A client bound to one endpoint and credential
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn endpoint(&self) -> &str;

    fn credential(&self) -> &str;

    /// Issue a single reachability request; any HTTP status is `Ok`
    async fn probe(&self, request: ProbeRequest) -> Result<ProbeResponse, ClientError>;

    /// Simple data read used to confirm connectivity before bulk reconnects
    async fn check_connectivity(&self) -> Result<(), ClientError>;

    async fn open_channel(&self, spec: ChannelSpec) -> Result<RealtimeChannel, ClientError>;

    async fn close_channel(&self, id: ChannelId);
}

/// Builds clients for resolved connection parameters
pub trait ClientFactory: Send + Sync {
    fn construct(
        &self,
        endpoint: &str,
        credential: &str,
    ) -> Result<Arc<dyn BackendClient>, ClientError>;
}

/// Realtime side of a client, supplied by the backend's client library
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
        credential: &str,
        spec: ChannelSpec,
    ) -> Result<RealtimeChannel, ClientError>;

    async fn close(&self, id: ChannelId);
}
