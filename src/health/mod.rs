//! # Health Monitoring
//!
//! Answers "is the backend reachable and is the credential still good?" without
//! hammering the backend. A healthy result is served from cache; repeated failures
//! open a circuit breaker that suspends probes; only one probe runs at a time.
//!
//! ```rust,no_run
//! use backend_resilience::config::{ConfigResolver, ResilienceSettings};
//! use backend_resilience::client::HttpClientFactory;
//! use backend_resilience::health::HealthMonitor;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let settings = ResilienceSettings::default();
//! let resolver = Arc::new(ConfigResolver::from_settings(
//!     &settings.connection,
//!     Arc::new(HttpClientFactory::new()),
//! ));
//! resolver.reinitialize(false);
//!
//! let monitor = HealthMonitor::new(resolver, settings.health.clone());
//! let result = monitor.check().await;
//! if !result.healthy {
//!     println!("backend unavailable: {:?}", result.error);
//! }
//! # }
//! ```

pub mod breaker;
pub mod monitor;
pub mod token;

pub use breaker::{CircuitState, ProbeCircuitBreaker};
pub use monitor::HealthMonitor;
pub use token::{assess_expiry, parse_credential_claims, CredentialClaims, ExpiryAssessment};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Outcome of one health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub error: Option<String>,
    /// The user must issue a new credential; retrying will not help
    pub is_expired_credential: bool,
    pub kind: Option<FailureKind>,
    /// Seconds until probes resume, set while the breaker is open
    pub retry_after_secs: Option<u64>,
    pub checked_at: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            error: None,
            is_expired_credential: false,
            kind: None,
            retry_after_secs: None,
            checked_at: Utc::now(),
        }
    }

    pub fn failure(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
            is_expired_credential: kind == FailureKind::CredentialExpired,
            kind: Some(kind),
            retry_after_secs: None,
            checked_at: Utc::now(),
        }
    }

    pub fn circuit_open(retry_after_secs: u64) -> Self {
        let mut result = Self::failure(
            FailureKind::CircuitOpen,
            format!(
                "Backend unavailable after repeated failures; retrying in {retry_after_secs}s"
            ),
        );
        result.retry_after_secs = Some(retry_after_secs);
        result
    }
}
