//! # Configuration Sources
//!
//! The environment pair is captured once at process start. The user override and the
//! offline flag live in an [`OverrideStore`], which the user can write at any time.
//! Store reads never fail: an unreadable store is logged and treated as empty.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::ConnectionSettings;
use crate::error::{ResilienceError, Result};

/// Endpoint/credential pair entered by the user
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialOverride {
    pub endpoint: String,
    pub credential: String,
}

impl CredentialOverride {
    pub fn new(endpoint: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: credential.into(),
        }
    }

    /// Only complete pairs take part in resolution
    pub fn is_complete(&self) -> bool {
        !self.endpoint.trim().is_empty() && !self.credential.trim().is_empty()
    }
}

impl std::fmt::Debug for CredentialOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialOverride")
            .field("endpoint", &self.endpoint)
            .field("credential", &"***")
            .finish()
    }
}

/// Process-start defaults
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSource {
    endpoint: Option<String>,
    credential: Option<String>,
}

impl EnvironmentSource {
    pub fn new(endpoint: Option<String>, credential: Option<String>) -> Self {
        Self {
            endpoint,
            credential,
        }
    }

    /// Read the configured variables once; empty values count as unset
    pub fn from_env(settings: &ConnectionSettings) -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let source = Self::new(
            read(&settings.endpoint_env),
            read(&settings.credential_env),
        );
        debug!(
            endpoint_env = %settings.endpoint_env,
            endpoint_present = source.endpoint.is_some(),
            credential_present = source.credential.is_some(),
            "Captured environment connection defaults"
        );
        source
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }
}

impl std::fmt::Debug for EnvironmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentSource")
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Persisted user choices: the override pair and the offline flag
pub trait OverrideStore: Send + Sync {
    fn load_override(&self) -> Option<CredentialOverride>;

    fn save_override(&self, value: &CredentialOverride) -> Result<()>;

    fn clear_override(&self) -> Result<()>;

    fn is_offline(&self) -> bool;

    fn set_offline(&self, offline: bool) -> Result<()>;
}

/// On-disk and in-memory document layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredOverrides {
    #[serde(rename = "override", default)]
    credential_override: Option<CredentialOverride>,
    #[serde(default)]
    offline: bool,
}

/// Non-persistent store, the default when no override file is configured
#[derive(Debug, Default)]
pub struct MemoryOverrideStore {
    state: RwLock<StoredOverrides>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverrideStore for MemoryOverrideStore {
    fn load_override(&self) -> Option<CredentialOverride> {
        self.state.read().credential_override.clone()
    }

    fn save_override(&self, value: &CredentialOverride) -> Result<()> {
        self.state.write().credential_override = Some(value.clone());
        Ok(())
    }

    fn clear_override(&self) -> Result<()> {
        self.state.write().credential_override = None;
        Ok(())
    }

    fn is_offline(&self) -> bool {
        self.state.read().offline
    }

    fn set_offline(&self, offline: bool) -> Result<()> {
        self.state.write().offline = offline;
        Ok(())
    }
}

/// JSON file store: `{ "override": {"endpoint", "credential"} | null, "offline": bool }`
#[derive(Debug)]
pub struct FileOverrideStore {
    path: PathBuf,
    // Serializes read-modify-write cycles
    lock: parking_lot::Mutex<()>,
}

impl FileOverrideStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: parking_lot::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> StoredOverrides {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(document) => document,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Override store is corrupt, ignoring it"
                    );
                    StoredOverrides::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredOverrides::default(),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read override store, ignoring it"
                );
                StoredOverrides::default()
            }
        }
    }

    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut StoredOverrides),
    {
        let _guard = self.lock.lock();
        let mut document = self.read_document();
        mutate(&mut document);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ResilienceError::override_store(format!(
                        "Failed to create {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(&document)?;
        // Write-then-rename so readers never see a half-written document
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(|e| {
            ResilienceError::override_store(format!("Failed to write {}: {e}", tmp_path.display()))
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            ResilienceError::override_store(format!(
                "Failed to replace {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(())
    }
}

impl OverrideStore for FileOverrideStore {
    fn load_override(&self) -> Option<CredentialOverride> {
        self.read_document().credential_override
    }

    fn save_override(&self, value: &CredentialOverride) -> Result<()> {
        let value = value.clone();
        self.update(move |document| document.credential_override = Some(value))
    }

    fn clear_override(&self) -> Result<()> {
        self.update(|document| document.credential_override = None)
    }

    fn is_offline(&self) -> bool {
        self.read_document().offline
    }

    fn set_offline(&self, offline: bool) -> Result<()> {
        self.update(move |document| document.offline = offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_completeness() {
        assert!(CredentialOverride::new("https://a.example.io", "key").is_complete());
        assert!(!CredentialOverride::new("https://a.io", " ").is_complete());
        assert!(!CredentialOverride::new("", "key").is_complete());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryOverrideStore::new();
        assert!(store.load_override().is_none());
        assert!(!store.is_offline());

        store
            .save_override(&CredentialOverride::new("https://abcd.io", "key"))
            .unwrap();
        store.set_offline(true).unwrap();
        assert_eq!(store.load_override().unwrap().endpoint, "https://abcd.io");
        assert!(store.is_offline());

        store.clear_override().unwrap();
        assert!(store.load_override().is_none());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("overrides.json");

        let store = FileOverrideStore::new(&path);
        assert!(store.load_override().is_none());
        store
            .save_override(&CredentialOverride::new("https://abcd.io", "key-1"))
            .unwrap();
        store.set_offline(true).unwrap();

        let reopened = FileOverrideStore::new(&path);
        assert_eq!(
            reopened.load_override(),
            Some(CredentialOverride::new("https://abcd.io", "key-1"))
        );
        assert!(reopened.is_offline());
    }

    #[test]
    fn test_file_store_ignores_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overrides.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileOverrideStore::new(&path);
        assert!(store.load_override().is_none());
        assert!(!store.is_offline());

        // Writing repairs the document
        store.set_offline(true).unwrap();
        assert!(store.is_offline());
    }

    #[test]
    fn test_environment_source_debug_masks_credential() {
        let source = EnvironmentSource::new(
            Some("https://abcd.io".to_string()),
            Some("secret".to_string()),
        );
        assert!(!format!("{source:?}").contains("secret"));
        assert_eq!(source.credential(), Some("secret"));
    }
}
