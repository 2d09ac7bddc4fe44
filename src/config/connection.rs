//! Connection parameters and the change notification built from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which source produced the active connection parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    EnvProvided,
    UserOverride,
    Disabled,
}

/// Immutable snapshot of the active backend connection parameters
///
/// Invariant: `offline` implies both `endpoint` and `credential` are `None`.
/// Use [`ConnectionConfig::offline`] to build the offline value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub endpoint: Option<String>,
    pub credential: Option<String>,
    pub source: ConfigSource,
    pub offline: bool,
}

impl ConnectionConfig {
    pub fn new(
        endpoint: Option<String>,
        credential: Option<String>,
        source: ConfigSource,
    ) -> Self {
        Self {
            endpoint,
            credential,
            source,
            offline: false,
        }
    }

    pub fn offline() -> Self {
        Self {
            endpoint: None,
            credential: None,
            source: ConfigSource::Disabled,
            offline: true,
        }
    }

    /// Both values present, neither a placeholder, and not offline
    pub fn is_valid(&self, placeholder_markers: &[String]) -> bool {
        if self.offline {
            return false;
        }
        match (&self.endpoint, &self.credential) {
            (Some(endpoint), Some(credential)) => {
                !is_placeholder(endpoint, placeholder_markers)
                    && !is_placeholder(credential, placeholder_markers)
            }
            _ => false,
        }
    }

    /// Endpoint and credential when both are usable
    pub fn usable_pair(&self, placeholder_markers: &[String]) -> Option<(&str, &str)> {
        if !self.is_valid(placeholder_markers) {
            return None;
        }
        Some((self.endpoint.as_deref()?, self.credential.as_deref()?))
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("source", &self.source)
            .field("offline", &self.offline)
            .finish()
    }
}

/// Empty, whitespace-only, or containing any marker (case-insensitive)
pub fn is_placeholder(value: &str, placeholder_markers: &[String]) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lowered = trimmed.to_lowercase();
    placeholder_markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}

/// Broadcast after every resolution that changes or forces the active config
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChangeEvent {
    pub endpoint: Option<String>,
    pub credential: Option<String>,
    pub source: ConfigSource,
    pub offline: bool,
    pub valid: bool,
    pub resolved_at: DateTime<Utc>,
}

impl ConfigChangeEvent {
    pub fn from_config(config: &ConnectionConfig, valid: bool) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            credential: config.credential.clone(),
            source: config.source,
            offline: config.offline,
            valid,
            resolved_at: Utc::now(),
        }
    }
}

impl fmt::Debug for ConfigChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigChangeEvent")
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("source", &self.source)
            .field("offline", &self.offline)
            .field("valid", &self.valid)
            .field("resolved_at", &self.resolved_at)
            .finish()
    }
}
