//! Config resolution through the public API

mod common;

use backend_resilience::client::HttpClientFactory;
use backend_resilience::config::{
    ConfigResolver, ConfigSource, ConnectionSettings, CredentialOverride, MemoryOverrideStore,
    OverrideStore,
};
use std::sync::Arc;

use common::{resolver_over, TEST_ENDPOINT};

#[test]
fn test_repeated_reinitialize_reuses_one_client() {
    let (resolver, factory) = resolver_over("anon-key-1", Arc::new(MemoryOverrideStore::new()));
    let mut events = resolver.subscribe();

    let first = resolver.reinitialize(false).unwrap();
    for _ in 0..20 {
        let again = resolver.reinitialize(false).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    assert_eq!(factory.constructed(), 1);
    assert!(events.try_recv().unwrap().valid);
    assert!(events.try_recv().is_err());
}

#[test]
fn test_offline_beats_user_override() {
    let store = Arc::new(MemoryOverrideStore::new());
    let (resolver, _) = resolver_over("anon-key-1", store.clone());
    let mut events = resolver.subscribe();

    resolver
        .set_override(CredentialOverride::new(
            "https://user.backend.io",
            "user-key",
        ))
        .unwrap();
    resolver.set_offline(true).unwrap();

    let resolved = resolver.resolve();
    assert!(resolved.offline);
    assert!(resolved.endpoint.is_none());
    assert!(resolved.credential.is_none());
    assert_eq!(resolved.source, ConfigSource::Disabled);
    assert!(resolver.current_client().is_none());

    let override_event = events.try_recv().unwrap();
    assert_eq!(override_event.source, ConfigSource::UserOverride);
    let offline_event = events.try_recv().unwrap();
    assert!(offline_event.offline);
    assert!(!offline_event.valid);

    // Leaving offline mode restores the stored override
    let client = resolver.set_offline(false).unwrap().unwrap();
    assert_eq!(client.endpoint(), "https://user.backend.io");
    assert!(store.load_override().is_some());
}

#[test]
fn test_clearing_override_falls_back_to_environment() {
    let (resolver, factory) = resolver_over("anon-key-1", Arc::new(MemoryOverrideStore::new()));
    resolver.reinitialize(false);

    let user = resolver
        .set_override(CredentialOverride::new("https://user.backend.io", "user-key"))
        .unwrap()
        .unwrap();
    assert_eq!(user.endpoint(), "https://user.backend.io");

    let env = resolver.clear_override().unwrap().unwrap();
    assert_eq!(env.endpoint(), TEST_ENDPOINT);
    assert_eq!(factory.constructed(), 3);
}

#[test]
fn test_construction_failure_reports_invalid() {
    let (resolver, factory) = resolver_over("anon-key-1", Arc::new(MemoryOverrideStore::new()));
    factory.fail_construction(true);
    let mut events = resolver.subscribe();

    assert!(resolver.reinitialize(false).is_none());
    let event = events.try_recv().unwrap();
    assert!(!event.valid);
    assert_eq!(event.endpoint.as_deref(), Some(TEST_ENDPOINT));

    factory.fail_construction(false);
    assert!(resolver.reinitialize(false).is_some());
}

#[test]
fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("overrides.json");
    let settings = ConnectionSettings {
        override_path: Some(path.clone()),
        ..ConnectionSettings::default()
    };

    let first = ConfigResolver::from_settings(&settings, Arc::new(HttpClientFactory::new()));
    first
        .set_override(CredentialOverride::new(
            "https://user.backend.io",
            "user-key",
        ))
        .unwrap();
    assert!(path.exists());

    let second = ConfigResolver::from_settings(&settings, Arc::new(HttpClientFactory::new()));
    let resolved = second.resolve();
    assert_eq!(resolved.source, ConfigSource::UserOverride);
    assert_eq!(resolved.endpoint.as_deref(), Some("https://user.backend.io"));

    let client = second.reinitialize(false).unwrap();
    assert_eq!(client.endpoint(), "https://user.backend.io");
}
