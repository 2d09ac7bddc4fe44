use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for the subscription manager
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionStats {
    pub active_channels: usize,
    pub events_delivered: u64,
    /// Change payloads that could not be mapped to a `ChangeEvent`
    pub parse_errors: u64,
    pub reconnects_scheduled: u64,
    pub channels_abandoned: u64,
    pub bulk_reconnects: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_error_at: Option<DateTime<Utc>>,
}
