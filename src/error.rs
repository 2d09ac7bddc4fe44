//! # Error Types
//!
//! Structured error handling for the connectivity layer. Connectivity problems are
//! expected and transient, so most of them travel as data (`FailureKind` on a
//! `HealthCheckResult`, `SubscriptionError` on the error callback) rather than as `Err`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, ResilienceError>;

/// Errors raised while loading settings or persisting user configuration
#[derive(Debug, Error)]
pub enum ResilienceError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Override store error: {0}")]
    OverrideStore(String),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("JSON serialization/deserialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ResilienceError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an override store error
    pub fn override_store(message: impl Into<String>) -> Self {
        Self::OverrideStore(message.into())
    }
}

impl From<config::ConfigError> for ResilienceError {
    fn from(error: config::ConfigError) -> Self {
        ResilienceError::Configuration(error.to_string())
    }
}

/// Transport-level failures reported by a backend client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No response at all: DNS, refused connection, TLS, reset
    #[error("Network error: {0}")]
    Network(String),

    /// The transport's own request deadline elapsed
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    #[error("Failed to construct client: {0}")]
    Construction(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Realtime transport is not available for this client")]
    RealtimeUnavailable,
}

impl ClientError {
    /// Check if error is recoverable (worth retrying)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::Timeout(_) | ClientError::Channel(_) => true,
            ClientError::Http { status } => *status >= 500,
            ClientError::Construction(_) | ClientError::RealtimeUnavailable => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return ClientError::Timeout(error.to_string());
        }
        match error.status() {
            Some(status) => ClientError::Http {
                status: status.as_u16(),
            },
            None => ClientError::Network(error.to_string()),
        }
    }
}

/// Classification of a failed health check
///
/// Each kind has its own remediation: configuration problems and expired credentials
/// need the user, the rest clear on their own or on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing or placeholder endpoint/credential, or offline mode
    ConfigInvalid,
    /// Credential expired or rejected with 401/403
    CredentialExpired,
    /// No response from the backend host
    Unreachable,
    /// Backend answered with an unexpected status
    Rejected,
    /// Probe did not complete before its deadline
    Timeout,
    /// Probes suspended until the breaker cooldown elapses
    CircuitOpen,
    /// Another probe is already running
    CheckInProgress,
}

impl FailureKind {
    /// Whether retrying without user action can succeed
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            FailureKind::ConfigInvalid | FailureKind::CredentialExpired
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::ConfigInvalid => "config_invalid",
            FailureKind::CredentialExpired => "credential_expired",
            FailureKind::Unreachable => "unreachable",
            FailureKind::Rejected => "rejected",
            FailureKind::Timeout => "timeout",
            FailureKind::CircuitOpen => "circuit_open",
            FailureKind::CheckInProgress => "check_in_progress",
        };
        f.write_str(label)
    }
}

/// Channel-level failures surfaced through `ChannelEventHandler::handle_channel_error`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// Terminal: automatic reconnection gave up, the caller must resubscribe
    #[error("Channel {key} abandoned after {attempts} reconnect attempts")]
    ChannelAbandoned { key: String, attempts: u32 },
}
