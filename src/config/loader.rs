//! Settings Loader
//!
//! Layers compiled defaults, an optional TOML file and `BACKEND_RESILIENCE__*`
//! environment variables into a validated [`ResilienceSettings`].

use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ResilienceSettings;
use crate::error::{ResilienceError, Result};

const ENV_PREFIX: &str = "BACKEND_RESILIENCE";
const DEFAULT_CONFIG_FILE: &str = "config/backend-resilience.toml";

/// Builds [`ResilienceSettings`] from layered sources
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`BACKEND_RESILIENCE__HEALTH__COOLDOWN_MS=10000`)
/// 2. Config file
/// 3. Default values
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    config_file: Option<PathBuf>,
    required: bool,
    use_environment: bool,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self {
            config_file: Some(PathBuf::from(DEFAULT_CONFIG_FILE)),
            required: false,
            use_environment: true,
        }
    }
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit file; a missing explicit file is an error
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self.required = true;
        self
    }

    /// Skip environment overrides (tests)
    pub fn without_environment(mut self) -> Self {
        self.use_environment = false;
        self
    }

    /// Load and validate settings
    pub fn load(&self) -> Result<ResilienceSettings> {
        let defaults = Config::try_from(&ResilienceSettings::default())?;
        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = &self.config_file {
            if self.required && !path.exists() {
                return Err(ResilienceError::configuration(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "Loading resilience settings file");
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(self.required),
            );
        }

        if self.use_environment {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("connection.placeholder_markers")
                    .try_parsing(true),
            );
        }

        let settings: ResilienceSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;

        debug!(
            failure_threshold = settings.health.failure_threshold,
            cooldown_ms = settings.health.cooldown_ms,
            max_reconnect_attempts = settings.subscriptions.max_reconnect_attempts,
            "Resilience settings loaded"
        );

        Ok(settings)
    }

    /// Load settings from a TOML file, without environment overrides
    pub fn load_file(path: &Path) -> Result<ResilienceSettings> {
        Self::new().with_file(path).without_environment().load()
    }
}
