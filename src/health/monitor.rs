//! # Health Monitor
//!
//! Check order, cheapest first:
//!
//! 1. healthy result cached within the TTL
//! 2. breaker open: synthetic failure with the remaining cooldown
//! 3. probe already running: synthetic "in progress" failure, no waiting
//! 4. no client: configuration failure
//! 5. credential expired (decoded locally)
//! 6. one network probe raced against a timeout
//!
//! Results from steps 4-6 are cached and counted by the breaker. Any configuration
//! change published by the resolver clears both before the next check.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::breaker::{CircuitState, ProbeCircuitBreaker};
use super::token::{assess_expiry, ExpiryAssessment};
use super::HealthCheckResult;
use crate::client::{BackendClient, ProbeRequest};
use crate::config::{ConfigChangeEvent, ConfigResolver, HealthSettings, MissingExpiryPolicy};
use crate::error::{ClientError, FailureKind};
use crate::utils::SingleFlightGuard;

#[derive(Debug, Clone)]
struct CachedResult {
    result: HealthCheckResult,
    stored_at: Instant,
}

pub struct HealthMonitor {
    resolver: Arc<ConfigResolver>,
    settings: HealthSettings,
    cache: Mutex<Option<CachedResult>>,
    breaker: ProbeCircuitBreaker,
    in_flight: AtomicBool,
    config_events: Mutex<broadcast::Receiver<ConfigChangeEvent>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("settings", &self.settings)
            .field("breaker", &self.breaker)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(resolver: Arc<ConfigResolver>, settings: HealthSettings) -> Self {
        let breaker = ProbeCircuitBreaker::new(settings.failure_threshold, settings.cooldown());
        let config_events = Mutex::new(resolver.subscribe());
        Self {
            resolver,
            settings,
            cache: Mutex::new(None),
            breaker,
            in_flight: AtomicBool::new(false),
            config_events,
        }
    }

    /// Check with the configured probe timeout
    pub async fn check(&self) -> HealthCheckResult {
        self.check_health(self.settings.probe_timeout()).await
    }

    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn check_health(&self, timeout: Duration) -> HealthCheckResult {
        if self.config_changed() {
            info!("Backend configuration changed, discarding health state");
            self.reset();
        }

        if let Some(cached) = self.cached_healthy() {
            debug!("Serving cached health result");
            return cached;
        }

        if let Some(remaining) = self.breaker.remaining() {
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            debug!(retry_after_secs = secs, "Circuit breaker open, skipping probe");
            return HealthCheckResult::circuit_open(secs.max(1));
        }

        let Some(_guard) = SingleFlightGuard::try_acquire(&self.in_flight) else {
            debug!("Health check already in progress");
            return HealthCheckResult::failure(
                FailureKind::CheckInProgress,
                "Health check already in progress; retry shortly",
            );
        };

        let result = self.run_checks(timeout).await;
        self.record(&result);
        result
    }

    async fn run_checks(&self, timeout: Duration) -> HealthCheckResult {
        let Some(client) = self.resolver.current_client() else {
            return self.missing_client_result();
        };

        match assess_expiry(client.credential(), Utc::now(), self.settings.expiry_buffer()) {
            ExpiryAssessment::Expired { expires_at } => {
                warn!(expires_at = %expires_at, "Backend credential expired or about to expire");
                return HealthCheckResult::failure(
                    FailureKind::CredentialExpired,
                    format!(
                        "Credential expired or expires within {}s (exp {expires_at}); issue a new credential",
                        self.settings.expiry_buffer_secs
                    ),
                );
            }
            ExpiryAssessment::NoExpiry
                if self.settings.missing_expiry == MissingExpiryPolicy::FailClosed =>
            {
                return HealthCheckResult::failure(
                    FailureKind::CredentialExpired,
                    "Credential has no expiry claim; issue a new credential",
                );
            }
            _ => {}
        }

        self.probe(client.as_ref(), timeout).await
    }

    /// Drain pending resolver events; true if any arrived since the last check
    fn config_changed(&self) -> bool {
        let mut events = self.config_events.lock();
        let mut changed = false;
        loop {
            match events.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => changed = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return changed,
            }
        }
    }

    fn missing_client_result(&self) -> HealthCheckResult {
        let message = match self.resolver.current_config() {
            Some(config) if config.offline => "Offline mode is enabled; backend access is disabled",
            Some(config) if !config.is_valid(self.resolver.placeholder_markers()) => {
                "Backend credentials are placeholders or missing; configure a real endpoint and credential"
            }
            _ => "Backend client not initialized",
        };
        HealthCheckResult::failure(FailureKind::ConfigInvalid, message)
    }

    async fn probe(&self, client: &dyn BackendClient, timeout: Duration) -> HealthCheckResult {
        let request = ProbeRequest::head(self.settings.probe_path.clone());

        match tokio::time::timeout(timeout, client.probe(request)).await {
            Err(_) => HealthCheckResult::failure(
                FailureKind::Timeout,
                format!(
                    "Backend did not respond within {}ms",
                    timeout.as_millis()
                ),
            ),
            Ok(Err(ClientError::Timeout(reason))) => HealthCheckResult::failure(
                FailureKind::Timeout,
                format!("Backend probe timed out: {reason}"),
            ),
            Ok(Err(ClientError::Network(reason))) => HealthCheckResult::failure(
                FailureKind::Unreachable,
                format!("Cannot reach backend host: {reason}"),
            ),
            Ok(Err(e)) => HealthCheckResult::failure(
                FailureKind::Unreachable,
                format!("Backend probe failed: {e}"),
            ),
            Ok(Ok(response)) => match response.status {
                200..=299 | 404 => HealthCheckResult::healthy(),
                401 | 403 => HealthCheckResult::failure(
                    FailureKind::CredentialExpired,
                    format!(
                        "Backend rejected the credential (HTTP {}); it may be expired or revoked",
                        response.status
                    ),
                ),
                status => HealthCheckResult::failure(
                    FailureKind::Rejected,
                    format!("Backend responded with HTTP {status}"),
                ),
            },
        }
    }

    fn record(&self, result: &HealthCheckResult) {
        *self.cache.lock() = Some(CachedResult {
            result: result.clone(),
            stored_at: Instant::now(),
        });

        if result.healthy {
            self.breaker.record_success();
        } else {
            warn!(
                kind = ?result.kind,
                error = result.error.as_deref().unwrap_or_default(),
                "Backend health check failed"
            );
            self.breaker.record_failure();
        }
    }

    fn cached_healthy(&self) -> Option<HealthCheckResult> {
        let cache = self.cache.lock();
        let cached = cache.as_ref()?;
        (cached.result.healthy && cached.stored_at.elapsed() < self.settings.cache_ttl())
            .then(|| cached.result.clone())
    }

    /// Most recent probe result, healthy or not
    pub fn last_result(&self) -> Option<HealthCheckResult> {
        self.cache.lock().as_ref().map(|cached| cached.result.clone())
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.breaker.consecutive_failures()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker_remaining(&self) -> Option<Duration> {
        self.breaker.remaining()
    }

    /// Forget the cached result and close the breaker, e.g. after the user edits credentials
    pub fn reset(&self) {
        *self.cache.lock() = None;
        self.breaker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionSettings, EnvironmentSource, MemoryOverrideStore};
    use crate::test_utils::{MockClientFactory, ProbeBehavior};

    fn monitor_with(
        credential: &str,
        settings: HealthSettings,
    ) -> (HealthMonitor, Arc<MockClientFactory>, Arc<ConfigResolver>) {
        let factory = Arc::new(MockClientFactory::new());
        let resolver = Arc::new(ConfigResolver::new(
            EnvironmentSource::new(
                Some("https://abcd.backend.io".to_string()),
                Some(credential.to_string()),
            ),
            Arc::new(MemoryOverrideStore::new()),
            factory.clone(),
            ConnectionSettings::default().placeholder_markers,
        ));
        resolver.reinitialize(false);
        (
            HealthMonitor::new(resolver.clone(), settings),
            factory,
            resolver,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_result_is_cached() {
        let (monitor, factory, _) = monitor_with("opaque-key", HealthSettings::default());
        assert!(monitor.check().await.healthy);
        assert!(monitor.check().await.healthy);
        assert_eq!(factory.backend().probe_count(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(monitor.check().await.healthy);
        assert_eq!(factory.backend().probe_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_not_served_from_cache() {
        let (monitor, factory, _) = monitor_with("opaque-key", HealthSettings::default());
        factory.backend().set_probe_behavior(ProbeBehavior::Status(500));

        let result = monitor.check().await;
        assert_eq!(result.kind, Some(FailureKind::Rejected));
        monitor.check().await;
        assert_eq!(factory.backend().probe_count(), 2);
        assert_eq!(monitor.last_result().unwrap().kind, Some(FailureKind::Rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_classification() {
        let (monitor, factory, _) = monitor_with("opaque-key", HealthSettings::default());
        let backend = factory.backend();

        backend.set_probe_behavior(ProbeBehavior::Status(404));
        assert!(monitor.check().await.healthy);

        monitor.reset();
        backend.set_probe_behavior(ProbeBehavior::Status(401));
        let result = monitor.check().await;
        assert!(result.is_expired_credential);
        assert_eq!(result.kind, Some(FailureKind::CredentialExpired));

        monitor.reset();
        backend.set_probe_behavior(ProbeBehavior::NetworkError);
        let result = monitor.check().await;
        assert_eq!(result.kind, Some(FailureKind::Unreachable));
        assert!(result.error.unwrap().contains("Cannot reach backend host"));

        monitor.reset();
        backend.set_probe_behavior(ProbeBehavior::ClientTimeout);
        let result = monitor.check_health(Duration::from_secs(30)).await;
        assert_eq!(result.kind, Some(FailureKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout() {
        let (monitor, factory, _) = monitor_with("opaque-key", HealthSettings::default());
        factory.backend().set_probe_behavior(ProbeBehavior::Hang);

        let result = monitor.check_health(Duration::from_millis(250)).await;
        assert_eq!(result.kind, Some(FailureKind::Timeout));
        assert!(!monitor.in_flight.load(Ordering::Acquire));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_check_reports_in_progress() {
        let (monitor, factory, _) = monitor_with("opaque-key", HealthSettings::default());
        factory.backend().set_probe_behavior(ProbeBehavior::Hang);

        let (first, second) = tokio::join!(
            monitor.check_health(Duration::from_secs(1)),
            async {
                tokio::task::yield_now().await;
                monitor.check_health(Duration::from_secs(1)).await
            }
        );
        assert_eq!(first.kind, Some(FailureKind::Timeout));
        assert_eq!(second.kind, Some(FailureKind::CheckInProgress));
        assert_eq!(factory.backend().probe_count(), 1);
        // Synthetic results do not count against the breaker
        assert_eq!(monitor.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_client_distinguishes_placeholders() {
        let (monitor, factory, _) = monitor_with("your-anon-key", HealthSettings::default());
        let result = monitor.check().await;
        assert_eq!(result.kind, Some(FailureKind::ConfigInvalid));
        assert!(result.error.unwrap().contains("placeholders"));
        assert_eq!(factory.backend().probe_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_client_when_offline() {
        let (monitor, _, resolver) = monitor_with("opaque-key", HealthSettings::default());
        resolver.set_offline(true).unwrap();
        let result = monitor.check().await;
        assert_eq!(result.kind, Some(FailureKind::ConfigInvalid));
        assert!(result.error.unwrap().contains("Offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_change_discards_cached_health() {
        let (monitor, factory, resolver) = monitor_with("opaque-key", HealthSettings::default());
        assert!(monitor.check().await.healthy);

        resolver.set_offline(true).unwrap();
        let result = monitor.check().await;
        assert_eq!(result.kind, Some(FailureKind::ConfigInvalid));
        assert_eq!(factory.backend().probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_change_closes_breaker() {
        let (monitor, factory, resolver) = monitor_with("opaque-key", HealthSettings::default());
        let backend = factory.backend();
        backend.set_probe_behavior(ProbeBehavior::Status(503));
        for _ in 0..3 {
            monitor.check().await;
        }
        assert_eq!(monitor.circuit_state(), CircuitState::Open);

        backend.set_probe_behavior(ProbeBehavior::Status(200));
        resolver.reinitialize(true);
        assert!(monitor.check().await.healthy);
        assert_eq!(monitor.circuit_state(), CircuitState::Closed);
        assert_eq!(backend.probe_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninitialized_resolver() {
        let resolver = Arc::new(ConfigResolver::new(
            EnvironmentSource::default(),
            Arc::new(MemoryOverrideStore::new()),
            Arc::new(MockClientFactory::new()),
            ConnectionSettings::default().placeholder_markers,
        ));
        let monitor = HealthMonitor::new(resolver, HealthSettings::default());
        let result = monitor.check().await;
        assert_eq!(result.error.as_deref(), Some("Backend client not initialized"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_expiry_policy() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;

        let token = format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
            URL_SAFE_NO_PAD.encode(r#"{"role":"service"}"#)
        );

        let (open, _, _) = monitor_with(&token, HealthSettings::default());
        assert!(open.check().await.healthy);

        let closed_settings = HealthSettings {
            missing_expiry: MissingExpiryPolicy::FailClosed,
            ..HealthSettings::default()
        };
        let (closed, factory, _) = monitor_with(&token, closed_settings);
        assert!(closed.check().await.is_expired_credential);
        assert_eq!(factory.backend().probe_count(), 0);
    }
}
