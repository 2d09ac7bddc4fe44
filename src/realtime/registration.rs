//! Per-key channel bookkeeping owned by the subscription manager.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::ChannelEventHandler;
use crate::client::{ChannelId, ChannelSpec, ChannelStatus};

/// Dedup key for a topic and optional filter
pub fn channel_key(topic: &str, filter: Option<&str>) -> String {
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(filter) => format!("{topic}:{filter}"),
        None => format!("{topic}:all"),
    }
}

/// Channel lifecycle
///
/// `Connecting -> Subscribed -> (Errored | TimedOut | Closed) -> Connecting -> ...`,
/// ending in `Abandoned` once the reconnect budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Subscribed,
    Errored,
    TimedOut,
    Closed,
    Abandoned,
}

impl ChannelState {
    /// Failure state for a non-subscribed transport status
    pub fn from_status(status: &ChannelStatus) -> Self {
        match status {
            ChannelStatus::Subscribed => ChannelState::Subscribed,
            ChannelStatus::ChannelError(_) => ChannelState::Errored,
            ChannelStatus::TimedOut => ChannelState::TimedOut,
            ChannelStatus::Closed => ChannelState::Closed,
        }
    }
}

/// What `subscribe` hands back; identical for deduplicated calls
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub key: String,
    pub name: String,
    /// Changes only when a registration is replaced (after unsubscribe or abandonment)
    pub registration_id: Uuid,
}

pub(crate) struct ChannelRegistration {
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) registration_id: Uuid,
    pub(crate) spec: ChannelSpec,
    pub(crate) handler: Arc<dyn ChannelEventHandler>,
    pub(crate) channel_id: Option<ChannelId>,
    pub(crate) state: ChannelState,
    pub(crate) reconnect_attempts: u32,
    pub(crate) max_reconnect_attempts: u32,
    /// Bumped on every (re)open; signals and timers from older generations are ignored
    pub(crate) generation: u64,
    pub(crate) pump: Option<JoinHandle<()>>,
    pub(crate) reconnect_timer: Option<JoinHandle<()>>,
}

impl ChannelRegistration {
    pub(crate) fn new(
        key: String,
        spec: ChannelSpec,
        handler: Arc<dyn ChannelEventHandler>,
        max_reconnect_attempts: u32,
        generation: u64,
    ) -> Self {
        Self {
            name: spec.name.clone(),
            key,
            registration_id: Uuid::new_v4(),
            spec,
            handler,
            channel_id: None,
            state: ChannelState::Connecting,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            generation,
            pump: None,
            reconnect_timer: None,
        }
    }

    pub(crate) fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            key: self.key.clone(),
            name: self.name.clone(),
            registration_id: self.registration_id,
        }
    }

    /// Abort the signal pump and any scheduled reconnect
    pub(crate) fn cancel_tasks(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for ChannelRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistration")
            .field("key", &self.key)
            .field("channel_id", &self.channel_id)
            .field("state", &self.state)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("generation", &self.generation)
            .field("reconnect_pending", &self.reconnect_timer.is_some())
            .finish()
    }
}
