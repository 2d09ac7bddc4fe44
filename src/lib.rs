#![allow(clippy::doc_markdown)] // Allow technical terms like JWT, PostgREST in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Backend Resilience
//!
//! Connectivity layer between an application and its hosted backend.
//!
//! ## Overview
//!
//! Three cooperating components keep the application usable while the backend,
//! the network, or the user's configuration misbehaves:
//!
//! - **[`config::ConfigResolver`]** decides which endpoint and credential are active
//!   (offline mode, then a user override, then the environment), rejects placeholder
//!   values, and rebuilds the client only when the resolved pair changes.
//! - **[`health::HealthMonitor`]** answers "is the backend usable right now?" with a
//!   cached, single-flight probe guarded by a circuit breaker, and recognizes expired
//!   credentials locally before touching the network.
//! - **[`realtime::SubscriptionManager`]** keeps one change-feed channel per
//!   `(topic, filter)` key alive across disconnects with capped exponential backoff,
//!   giving up after a bounded number of attempts.
//!
//! None of them return errors for connectivity problems. Invalid configuration is a
//! `valid: false` event and a missing client, health failures are a classified
//! [`health::HealthCheckResult`], and abandoned channels are reported to the
//! subscriber's error callback.
//!
//! ## Module Organization
//!
//! - [`client`] - Backend client contract and the reqwest implementation
//! - [`config`] - Settings, connection sources and the resolver
//! - [`health`] - Health checks, credential expiry and the circuit breaker
//! - [`realtime`] - Deduplicated, self-healing subscriptions
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use backend_resilience::client::HttpClientFactory;
//! use backend_resilience::config::{ConfigResolver, SettingsLoader};
//! use backend_resilience::health::HealthMonitor;
//! use std::sync::Arc;
//!
//! # async fn example() -> backend_resilience::Result<()> {
//! let settings = SettingsLoader::new().load()?;
//! let resolver = Arc::new(ConfigResolver::from_settings(
//!     &settings.connection,
//!     Arc::new(HttpClientFactory::new()),
//! ));
//! resolver.reinitialize(false);
//!
//! let monitor = HealthMonitor::new(resolver.clone(), settings.health);
//! let result = monitor.check().await;
//! println!("healthy: {}", result.healthy);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod realtime;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod utils;

pub use client::{BackendClient, ClientFactory, HttpBackendClient, HttpClientFactory};
pub use config::{
    ConfigChangeEvent, ConfigResolver, ConfigSource, ConnectionConfig, ResilienceSettings,
    SettingsLoader,
};
pub use error::{ClientError, FailureKind, ResilienceError, Result, SubscriptionError};
pub use health::{HealthCheckResult, HealthMonitor};
pub use realtime::{
    BulkReconnectOutcome, ChangeEvent, ChannelEventHandler, ChannelState, SubscriptionHandle,
    SubscriptionManager,
};
