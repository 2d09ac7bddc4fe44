//! # Realtime Subscriptions
//!
//! Long-lived, deduplicated change-feed channels that heal themselves across
//! transient disconnects.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use backend_resilience::client::BackendClient;
//! use backend_resilience::config::SubscriptionSettings;
//! use backend_resilience::realtime::{ChangeEvent, SubscriptionManager};
//! use std::sync::Arc;
//!
//! # async fn example(client: Arc<dyn BackendClient>) {
//! let manager = SubscriptionManager::new(client, SubscriptionSettings::default());
//!
//! let handle = manager
//!     .subscribe(
//!         "tasks",
//!         Arc::new(|event: ChangeEvent| println!("{:?}", event.event_type)),
//!         Some("owner_id=eq.42"),
//!     )
//!     .await;
//!
//! manager.unsubscribe(&handle.key).await;
//! # }
//! ```

pub mod backoff;
pub mod manager;
pub mod registration;
pub mod stats;

pub use backoff::ReconnectBackoff;
pub use manager::{BulkReconnectOutcome, SubscriptionManager};
pub use registration::{channel_key, ChannelState, SubscriptionHandle};
pub use stats::SubscriptionStats;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::client::{ChangeType, RawChange};
use crate::error::SubscriptionError;

/// A row-level change delivered to a handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_type: ChangeType,
    pub new: Option<Value>,
    pub old: Option<Value>,
}

impl TryFrom<RawChange> for ChangeEvent {
    type Error = String;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        let event_type = match ChangeType::parse(&raw.event_type) {
            Some(ChangeType::All) | None => {
                return Err(format!("unknown change type '{}'", raw.event_type))
            }
            Some(event_type) => event_type,
        };
        Ok(Self {
            event_type,
            new: non_empty(raw.new),
            old: non_empty(raw.old),
        })
    }
}

fn non_empty(value: Value) -> Option<Value> {
    match &value {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        _ => Some(value),
    }
}

/// Receives a channel's changes, in arrival order, and its terminal failure
pub trait ChannelEventHandler: Send + Sync {
    fn handle_change(&self, event: ChangeEvent);

    fn handle_channel_error(&self, error: &SubscriptionError) {
        error!("Realtime channel failed: {}", error);
    }
}

impl<F> ChannelEventHandler for F
where
    F: Fn(ChangeEvent) + Send + Sync,
{
    fn handle_change(&self, event: ChangeEvent) {
        self(event)
    }
}
