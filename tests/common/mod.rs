//! Shared setup for integration tests

#![allow(dead_code)]

use backend_resilience::config::{
    ConfigResolver, ConnectionSettings, EnvironmentSource, HealthSettings, MemoryOverrideStore,
};
use backend_resilience::health::HealthMonitor;
use backend_resilience::test_utils::MockClientFactory;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::sync::Arc;

pub const TEST_ENDPOINT: &str = "https://abcd.backend.io";

pub fn resolver_over(
    credential: &str,
    store: Arc<MemoryOverrideStore>,
) -> (Arc<ConfigResolver>, Arc<MockClientFactory>) {
    let factory = Arc::new(MockClientFactory::new());
    let resolver = Arc::new(ConfigResolver::new(
        EnvironmentSource::new(Some(TEST_ENDPOINT.to_string()), Some(credential.to_string())),
        store,
        factory.clone(),
        ConnectionSettings::default().placeholder_markers,
    ));
    (resolver, factory)
}

pub fn monitor_over(
    credential: &str,
    settings: HealthSettings,
) -> (HealthMonitor, Arc<MockClientFactory>, Arc<ConfigResolver>) {
    let (resolver, factory) = resolver_over(credential, Arc::new(MemoryOverrideStore::new()));
    resolver.reinitialize(false);
    (
        HealthMonitor::new(resolver.clone(), settings),
        factory,
        resolver,
    )
}

/// Unsigned three-segment token with the given claims
pub fn token_with_claims(claims: serde_json::Value) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// Let spawned tasks run without moving the clock
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
