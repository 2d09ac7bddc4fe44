//! Capped exponential reconnect delay: `min(base * 2^attempt, max)`.

use std::time::Duration;

use crate::config::SubscriptionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    base_ms: u64,
    max_ms: u64,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: base.as_millis().try_into().unwrap_or(u64::MAX),
            max_ms: max.as_millis().try_into().unwrap_or(u64::MAX),
        }
    }

    pub fn from_settings(settings: &SubscriptionSettings) -> Self {
        Self {
            base_ms: settings.base_delay_ms,
            max_ms: settings.max_delay_ms,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from_settings(&SubscriptionSettings::default())
    }
}
