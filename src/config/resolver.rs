//! # Config Resolver
//!
//! Resolves the active [`ConnectionConfig`] from three sources, highest priority first:
//!
//! 1. the offline flag (wins over everything)
//! 2. a complete user override
//! 3. environment defaults
//!
//! and keeps the active client in step with it. Reinitialising without a real change
//! hands back the same client instance.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{
    ConfigChangeEvent, ConfigEventPublisher, ConfigSource, ConnectionConfig,
    ConnectionSettings, CredentialOverride, EnvironmentSource, FileOverrideStore,
    MemoryOverrideStore, OverrideStore,
};
use crate::client::{BackendClient, ClientFactory};
use crate::error::Result;

#[derive(Default)]
struct ActiveConnection {
    config: Option<ConnectionConfig>,
    client: Option<Arc<dyn BackendClient>>,
}

/// Owns the active connection config and client
pub struct ConfigResolver {
    environment: EnvironmentSource,
    store: Arc<dyn OverrideStore>,
    factory: Arc<dyn ClientFactory>,
    placeholder_markers: Vec<String>,
    publisher: ConfigEventPublisher,
    active: Mutex<ActiveConnection>,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.active.lock();
        f.debug_struct("ConfigResolver")
            .field("environment", &self.environment)
            .field("active_config", &active.config)
            .field("client", &active.client.is_some())
            .finish()
    }
}

impl ConfigResolver {
    pub fn new(
        environment: EnvironmentSource,
        store: Arc<dyn OverrideStore>,
        factory: Arc<dyn ClientFactory>,
        placeholder_markers: Vec<String>,
    ) -> Self {
        Self {
            environment,
            store,
            factory,
            placeholder_markers,
            publisher: ConfigEventPublisher::default(),
            active: Mutex::new(ActiveConnection::default()),
        }
    }

    /// Environment captured now, store chosen by `override_path`
    pub fn from_settings(settings: &ConnectionSettings, factory: Arc<dyn ClientFactory>) -> Self {
        let store: Arc<dyn OverrideStore> = match &settings.override_path {
            Some(path) => Arc::new(FileOverrideStore::new(path)),
            None => Arc::new(MemoryOverrideStore::new()),
        };
        Self::new(
            EnvironmentSource::from_env(settings),
            store,
            factory,
            settings.placeholder_markers.clone(),
        )
    }

    pub fn placeholder_markers(&self) -> &[String] {
        &self.placeholder_markers
    }

    /// Read the sources in priority order; no side effects
    pub fn resolve(&self) -> ConnectionConfig {
        if self.store.is_offline() {
            return ConnectionConfig::offline();
        }

        if let Some(user) = self
            .store
            .load_override()
            .filter(CredentialOverride::is_complete)
        {
            return ConnectionConfig::new(
                Some(user.endpoint),
                Some(user.credential),
                ConfigSource::UserOverride,
            );
        }

        ConnectionConfig::new(
            self.environment.endpoint().map(str::to_string),
            self.environment.credential().map(str::to_string),
            ConfigSource::EnvProvided,
        )
    }

    /// Re-resolve and rebuild the client when needed
    ///
    /// Returns the existing client untouched when nothing changed, `force` is false and
    /// a client exists. Otherwise decides the new client (`None` for offline, missing or
    /// placeholder values, or a failed construction), publishes one
    /// [`ConfigChangeEvent`] and returns it.
    pub fn reinitialize(&self, force: bool) -> Option<Arc<dyn BackendClient>> {
        let resolved = self.resolve();
        let mut active = self.active.lock();

        let unchanged = active.config.as_ref() == Some(&resolved);
        if unchanged && !force {
            if let Some(client) = &active.client {
                debug!(source = ?resolved.source, "Connection config unchanged, reusing client");
                return Some(Arc::clone(client));
            }
        }

        let client = match resolved.usable_pair(&self.placeholder_markers) {
            Some((endpoint, credential)) => match self.factory.construct(endpoint, credential) {
                Ok(client) => Some(client),
                Err(e) => {
                    error!(endpoint = %endpoint, error = %e, "Failed to construct backend client");
                    None
                }
            },
            None => {
                if resolved.offline {
                    info!("Offline mode enabled, backend client disabled");
                } else {
                    warn!(
                        source = ?resolved.source,
                        endpoint_present = resolved.endpoint.is_some(),
                        credential_present = resolved.credential.is_some(),
                        "Backend configuration missing or placeholder, client disabled"
                    );
                }
                None
            }
        };

        let valid = client.is_some();
        let event = ConfigChangeEvent::from_config(&resolved, valid);

        info!(
            source = ?resolved.source,
            offline = resolved.offline,
            valid,
            forced = force,
            "🔧 Backend connection config resolved"
        );

        active.config = Some(resolved);
        active.client = client.clone();
        drop(active);

        self.publisher.publish(event);
        client
    }

    pub fn current_config(&self) -> Option<ConnectionConfig> {
        self.active.lock().config.clone()
    }

    pub fn current_client(&self) -> Option<Arc<dyn BackendClient>> {
        self.active.lock().client.clone()
    }

    /// Listen for [`ConfigChangeEvent`]s
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.publisher.subscribe()
    }

    /// Persist a user override and re-resolve
    pub fn set_override(
        &self,
        value: CredentialOverride,
    ) -> Result<Option<Arc<dyn BackendClient>>> {
        self.store.save_override(&value)?;
        Ok(self.reinitialize(false))
    }

    /// Drop the user override and re-resolve
    pub fn clear_override(&self) -> Result<Option<Arc<dyn BackendClient>>> {
        self.store.clear_override()?;
        Ok(self.reinitialize(false))
    }

    /// Persist the offline flag and re-resolve
    pub fn set_offline(&self, offline: bool) -> Result<Option<Arc<dyn BackendClient>>> {
        self.store.set_offline(offline)?;
        Ok(self.reinitialize(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionSettings;
    use crate::test_utils::MockClientFactory;

    fn resolver_with(
        environment: EnvironmentSource,
    ) -> (ConfigResolver, Arc<MemoryOverrideStore>, Arc<MockClientFactory>) {
        let store = Arc::new(MemoryOverrideStore::new());
        let factory = Arc::new(MockClientFactory::new());
        let resolver = ConfigResolver::new(
            environment,
            store.clone(),
            factory.clone(),
            ConnectionSettings::default().placeholder_markers,
        );
        (resolver, store, factory)
    }

    fn env_source() -> EnvironmentSource {
        EnvironmentSource::new(
            Some("https://env.backend.io".to_string()),
            Some("env-key-1".to_string()),
        )
    }

    #[test]
    fn test_resolve_priority() {
        let (resolver, store, _) = resolver_with(env_source());
        assert_eq!(resolver.resolve().source, ConfigSource::EnvProvided);

        store
            .save_override(&CredentialOverride::new("https://user.backend.io", "user-key"))
            .unwrap();
        let resolved = resolver.resolve();
        assert_eq!(resolved.source, ConfigSource::UserOverride);
        assert_eq!(resolved.endpoint.as_deref(), Some("https://user.backend.io"));

        store.set_offline(true).unwrap();
        assert_eq!(resolver.resolve(), ConnectionConfig::offline());
    }

    #[test]
    fn test_incomplete_override_falls_through_to_environment() {
        let (resolver, store, _) = resolver_with(env_source());
        store
            .save_override(&CredentialOverride::new("https://user.backend.io", ""))
            .unwrap();
        assert_eq!(resolver.resolve().source, ConfigSource::EnvProvided);
    }

    #[test]
    fn test_reinitialize_is_idempotent() {
        let (resolver, _, factory) = resolver_with(env_source());
        let first = resolver.reinitialize(false).unwrap();
        let second = resolver.reinitialize(false).unwrap();
        let third = resolver.reinitialize(false).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(factory.constructed(), 1);
    }

    #[test]
    fn test_forced_reinitialize_rebuilds_and_emits() {
        let (resolver, _, factory) = resolver_with(env_source());
        let mut events = resolver.subscribe();

        let first = resolver.reinitialize(false).unwrap();
        let forced = resolver.reinitialize(true).unwrap();
        assert!(!Arc::ptr_eq(&first, &forced));
        assert_eq!(factory.constructed(), 2);

        assert!(events.try_recv().unwrap().valid);
        let forced_event = events.try_recv().unwrap();
        assert!(forced_event.valid);
        assert_eq!(forced_event.source, ConfigSource::EnvProvided);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_offline_disables_client_and_reports_invalid() {
        let (resolver, _, _) = resolver_with(env_source());
        let mut events = resolver.subscribe();
        assert!(resolver.reinitialize(false).is_some());

        let client = resolver.set_offline(true).unwrap();
        assert!(client.is_none());
        assert!(resolver.current_client().is_none());

        let _initial = events.try_recv().unwrap();
        let event = events.try_recv().unwrap();
        assert!(event.offline);
        assert!(!event.valid);
        assert!(event.endpoint.is_none());
        assert!(event.credential.is_none());
        assert_eq!(event.source, ConfigSource::Disabled);
    }

    #[test]
    fn test_placeholder_credentials_yield_no_client() {
        let (resolver, _, factory) = resolver_with(EnvironmentSource::new(
            Some("https://your-project.supabase.co".to_string()),
            Some("your-anon-key".to_string()),
        ));
        let mut events = resolver.subscribe();

        assert!(resolver.reinitialize(false).is_none());
        assert_eq!(factory.constructed(), 0);
        assert!(!events.try_recv().unwrap().valid);
    }

    #[test]
    fn test_missing_client_is_retried_without_force() {
        let (resolver, _, factory) = resolver_with(EnvironmentSource::default());
        let mut events = resolver.subscribe();

        assert!(resolver.reinitialize(false).is_none());
        assert!(resolver.reinitialize(false).is_none());
        // No client to reuse, so each call resolves and notifies again
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_ok());
        assert_eq!(factory.constructed(), 0);
    }

    #[test]
    fn test_construction_failure_reports_invalid() {
        let (resolver, _, factory) = resolver_with(env_source());
        factory.fail_construction(true);
        let mut events = resolver.subscribe();

        assert!(resolver.reinitialize(false).is_none());
        assert!(!events.try_recv().unwrap().valid);
    }

    #[test]
    fn test_override_switches_client() {
        let (resolver, _, _) = resolver_with(env_source());
        let env_client = resolver.reinitialize(false).unwrap();
        assert_eq!(env_client.endpoint(), "https://env.backend.io");

        let user_client = resolver
            .set_override(CredentialOverride::new("https://user.backend.io", "user-key"))
            .unwrap()
            .unwrap();
        assert_eq!(user_client.endpoint(), "https://user.backend.io");

        let restored = resolver.clear_override().unwrap().unwrap();
        assert_eq!(restored.endpoint(), "https://env.backend.io");
        assert!(!Arc::ptr_eq(&env_client, &restored));
    }
}
