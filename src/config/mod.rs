//! # Configuration
//!
//! Two kinds of configuration live here:
//!
//! - [`ResilienceSettings`]: tunables for the health monitor and subscription manager,
//!   loaded once at startup through [`loader::SettingsLoader`].
//! - [`ConnectionConfig`]: the active backend endpoint/credential, resolved at runtime
//!   by [`ConfigResolver`] from the offline flag, the user override and the environment.

pub mod connection;
pub mod events;
pub mod loader;
pub mod resolver;
pub mod sources;

pub use connection::{is_placeholder, ConfigChangeEvent, ConfigSource, ConnectionConfig};
pub use events::ConfigEventPublisher;
pub use loader::SettingsLoader;
pub use resolver::ConfigResolver;
pub use sources::{
    CredentialOverride, EnvironmentSource, FileOverrideStore, MemoryOverrideStore, OverrideStore,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ResilienceError, Result};

/// Root settings document
///
/// ```rust
/// use backend_resilience::config::ResilienceSettings;
///
/// let settings = ResilienceSettings::default();
/// assert_eq!(settings.health.failure_threshold, 3);
/// assert_eq!(settings.subscriptions.max_reconnect_attempts, 5);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    pub connection: ConnectionSettings,
    pub health: HealthSettings,
    pub subscriptions: SubscriptionSettings,
}

/// Where connection parameters come from and what counts as unconfigured
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Environment variable holding the default endpoint
    pub endpoint_env: String,
    /// Environment variable holding the default credential
    pub credential_env: String,
    /// JSON file persisting the user override and offline flag; in-memory when unset
    pub override_path: Option<PathBuf>,
    /// Case-insensitive substrings marking template values
    pub placeholder_markers: Vec<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint_env: "BACKEND_URL".to_string(),
            credential_env: "BACKEND_CREDENTIAL".to_string(),
            override_path: None,
            placeholder_markers: [
                "your-project",
                "your_project",
                "your-anon-key",
                "your-api-key",
                "placeholder",
                "example",
                "changeme",
                "xxxx",
                "<",
            ]
            .iter()
            .map(|marker| (*marker).to_string())
            .collect(),
        }
    }
}

/// What to do with a decodable token that carries no `exp` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingExpiryPolicy {
    /// Treat as not expired and continue to the network probe
    FailOpen,
    /// Treat as expired
    FailClosed,
}

/// Health monitor tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub cache_ttl_ms: u64,
    /// Consecutive failed probes before the breaker opens
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    /// Tokens expiring sooner than this are reported as expired
    pub expiry_buffer_secs: u64,
    pub probe_timeout_ms: u64,
    pub probe_path: String,
    pub missing_expiry: MissingExpiryPolicy,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 60_000,
            failure_threshold: 3,
            cooldown_ms: 30_000,
            expiry_buffer_secs: 300,
            probe_timeout_ms: 5_000,
            probe_path: "/rest/v1/".to_string(),
            missing_expiry: MissingExpiryPolicy::FailOpen,
        }
    }
}

impl HealthSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn expiry_buffer(&self) -> Duration {
        Duration::from_secs(self.expiry_buffer_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Subscription manager tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    pub max_reconnect_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Pause between channels during `reconnect_all`
    pub bulk_reconnect_delay_ms: u64,
    /// Bounded buffer for channel signals
    pub channel_buffer_size: usize,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            bulk_reconnect_delay_ms: 100,
            channel_buffer_size: 256,
        }
    }
}

impl SubscriptionSettings {
    pub fn bulk_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.bulk_reconnect_delay_ms)
    }
}

impl ResilienceSettings {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.connection.endpoint_env.is_empty() || self.connection.credential_env.is_empty() {
            return Err(ResilienceError::configuration(
                "connection.endpoint_env and connection.credential_env must be set",
            ));
        }

        let health = &self.health;
        if health.failure_threshold == 0 {
            return Err(ResilienceError::configuration(
                "health.failure_threshold must be greater than 0",
            ));
        }
        if health.cooldown_ms == 0 {
            return Err(ResilienceError::configuration(
                "health.cooldown_ms must be greater than 0",
            ));
        }
        if health.probe_timeout_ms == 0 {
            return Err(ResilienceError::configuration(
                "health.probe_timeout_ms must be greater than 0",
            ));
        }
        if !health.probe_path.starts_with('/') {
            return Err(ResilienceError::configuration(
                "health.probe_path must start with '/'",
            ));
        }

        let subscriptions = &self.subscriptions;
        if subscriptions.base_delay_ms == 0 {
            return Err(ResilienceError::configuration(
                "subscriptions.base_delay_ms must be greater than 0",
            ));
        }
        if subscriptions.max_delay_ms < subscriptions.base_delay_ms {
            return Err(ResilienceError::configuration(
                "subscriptions.max_delay_ms must be at least subscriptions.base_delay_ms",
            ));
        }
        if subscriptions.channel_buffer_size == 0 {
            return Err(ResilienceError::configuration(
                "subscriptions.channel_buffer_size must be greater than 0",
            ));
        }

        Ok(())
    }
}
