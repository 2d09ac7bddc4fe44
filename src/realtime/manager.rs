//! # Subscription Manager
//!
//! Owns the channel registry: at most one live channel per `(topic, filter)` key.
//! Each channel has a signal pump task that delivers changes to the registered
//! handler in order and hands failures to the reconnect scheduler.
//!
//! Every (re)open gets a fresh generation number. Signals, open results and timers
//! carrying an older generation are ignored and their channels closed, so a
//! reconnect that was in flight when its registration was replaced can never
//! deliver into the new one.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::ReconnectBackoff;
use super::registration::{channel_key, ChannelRegistration, ChannelState, SubscriptionHandle};
use super::stats::SubscriptionStats;
use super::{ChangeEvent, ChannelEventHandler};
use crate::client::{
    BackendClient, ChangeType, ChannelId, ChannelSignal, ChannelSpec, ChannelStatus, RawChange,
};
use crate::config::SubscriptionSettings;
use crate::error::SubscriptionError;
use crate::utils::SingleFlightGuard;

/// Result of a bulk reconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkReconnectOutcome {
    /// Another bulk reconnect is running; nothing was done
    AlreadyRunning,
    /// The connectivity check failed; no channel was touched
    ConnectivityFailed(String),
    Reconnected { channels: usize },
}

struct Shared {
    client: Arc<dyn BackendClient>,
    settings: SubscriptionSettings,
    backoff: ReconnectBackoff,
    registry: Mutex<HashMap<String, ChannelRegistration>>,
    stats: Mutex<SubscriptionStats>,
    bulk_in_flight: AtomicBool,
    next_generation: AtomicU64,
}

impl Shared {
    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    fn spawn_close(&self, id: ChannelId) {
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            client.close_channel(id).await;
        });
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for registration in self.registry.get_mut().values_mut() {
            registration.cancel_tasks();
        }
    }
}

/// Deduplicated, self-healing realtime subscriptions against one client
///
/// Cloning shares the same registry. Background tasks stop once the last clone
/// is dropped.
#[derive(Clone)]
pub struct SubscriptionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("endpoint", &self.shared.client.endpoint())
            .field("settings", &self.shared.settings)
            .field("channels", &self.shared.registry.lock().len())
            .finish()
    }
}

impl SubscriptionManager {
    pub fn new(client: Arc<dyn BackendClient>, settings: SubscriptionSettings) -> Self {
        let backoff = ReconnectBackoff::from_settings(&settings);
        Self {
            shared: Arc::new(Shared {
                client,
                settings,
                backoff,
                registry: Mutex::new(HashMap::new()),
                stats: Mutex::new(SubscriptionStats::default()),
                bulk_in_flight: AtomicBool::new(false),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to every change type on `topic`
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn ChannelEventHandler>,
        filter: Option<&str>,
    ) -> SubscriptionHandle {
        self.subscribe_events(topic, ChangeType::All, handler, filter)
            .await
    }

    /// Subscribe to `events` on `topic`
    ///
    /// A live registration for the same key is returned unchanged and `handler` is
    /// discarded. An abandoned registration is replaced.
    #[instrument(skip(self, handler))]
    pub async fn subscribe_events(
        &self,
        topic: &str,
        events: ChangeType,
        handler: Arc<dyn ChannelEventHandler>,
        filter: Option<&str>,
    ) -> SubscriptionHandle {
        let key = channel_key(topic, filter);

        let (handle, generation, replaced_channel) = {
            let mut registry = self.shared.registry.lock();
            let mut replaced_channel = None;
            if let Some(existing) = registry.get_mut(&key) {
                if existing.state != ChannelState::Abandoned {
                    debug!(key = %key, "Reusing existing channel registration");
                    return existing.handle();
                }
                info!(key = %key, "Replacing abandoned channel registration");
                existing.cancel_tasks();
                replaced_channel = existing.channel_id.take();
            }

            let generation = self.shared.next_generation();
            let spec = ChannelSpec {
                name: format!("realtime:{key}"),
                topic: topic.to_string(),
                filter: filter
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string),
                events,
                buffer_size: self.shared.settings.channel_buffer_size,
            };
            let registration = ChannelRegistration::new(
                key.clone(),
                spec,
                handler,
                self.shared.settings.max_reconnect_attempts,
                generation,
            );
            let handle = registration.handle();
            registry.insert(key.clone(), registration);
            (handle, generation, replaced_channel)
        };

        if let Some(id) = replaced_channel {
            self.shared.client.close_channel(id).await;
        }

        info!(key = %key, channel = %handle.name, "Opening realtime channel");
        open_and_attach(&self.shared, &key, generation).await;
        handle
    }

    /// Tear down one channel and cancel its pending reconnect
    ///
    /// Returns `false` when the key was not registered.
    pub async fn unsubscribe(&self, key: &str) -> bool {
        let removed = {
            let mut registry = self.shared.registry.lock();
            registry.remove(key).map(|mut registration| {
                registration.cancel_tasks();
                registration.channel_id.take()
            })
        };

        match removed {
            Some(channel_id) => {
                if let Some(id) = channel_id {
                    self.shared.client.close_channel(id).await;
                }
                info!(key = %key, "Unsubscribed realtime channel");
                true
            }
            None => false,
        }
    }

    /// Tear down every channel; returns how many registrations were removed
    pub async fn unsubscribe_all(&self) -> usize {
        let channels: Vec<Option<ChannelId>> = {
            let mut registry = self.shared.registry.lock();
            registry
                .drain()
                .map(|(_, mut registration)| {
                    registration.cancel_tasks();
                    registration.channel_id.take()
                })
                .collect()
        };

        let count = channels.len();
        for id in channels.into_iter().flatten() {
            self.shared.client.close_channel(id).await;
        }
        if count > 0 {
            info!(channels = count, "Unsubscribed all realtime channels");
        }
        count
    }

    /// Recreate every tracked channel after a broader outage
    ///
    /// Runs at most once at a time. When the connectivity check fails nothing is
    /// torn down. Channels are recreated one by one with a pause in between, and
    /// each one starts a fresh failure episode.
    #[instrument(skip(self))]
    pub async fn reconnect_all(&self) -> BulkReconnectOutcome {
        let Some(_guard) = SingleFlightGuard::try_acquire(&self.shared.bulk_in_flight) else {
            debug!("Bulk reconnect already running");
            return BulkReconnectOutcome::AlreadyRunning;
        };

        if let Err(e) = self.shared.client.check_connectivity().await {
            warn!(error = %e, "Connectivity check failed, keeping existing channels");
            return BulkReconnectOutcome::ConnectivityFailed(e.to_string());
        }

        let mut keys: Vec<String> = self.shared.registry.lock().keys().cloned().collect();
        keys.sort();

        let mut reconnected = 0;
        for (index, key) in keys.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.shared.settings.bulk_reconnect_delay()).await;
            }

            let restart = {
                let mut registry = self.shared.registry.lock();
                registry.get_mut(key).map(|registration| {
                    registration.cancel_tasks();
                    registration.reconnect_attempts = 0;
                    registration.state = ChannelState::Connecting;
                    registration.generation = self.shared.next_generation();
                    (registration.channel_id.take(), registration.generation)
                })
            };
            // Unsubscribed while we were pausing
            let Some((stale, generation)) = restart else {
                continue;
            };

            if let Some(id) = stale {
                self.shared.client.close_channel(id).await;
            }
            open_and_attach(&self.shared, key, generation).await;
            reconnected += 1;
        }

        self.shared.stats.lock().bulk_reconnects += 1;
        info!(channels = reconnected, "✅ Bulk reconnect complete");
        BulkReconnectOutcome::Reconnected {
            channels: reconnected,
        }
    }

    pub fn state(&self, key: &str) -> Option<ChannelState> {
        self.shared.registry.lock().get(key).map(|r| r.state)
    }

    pub fn reconnect_attempts(&self, key: &str) -> Option<u32> {
        self.shared
            .registry
            .lock()
            .get(key)
            .map(|r| r.reconnect_attempts)
    }

    /// Whether a reconnect timer is scheduled and has not fired yet
    pub fn has_pending_reconnect(&self, key: &str) -> bool {
        self.shared
            .registry
            .lock()
            .get(key)
            .is_some_and(|r| r.reconnect_timer.is_some())
    }

    pub fn handle(&self, key: &str) -> Option<SubscriptionHandle> {
        self.shared.registry.lock().get(key).map(|r| r.handle())
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.registry.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> SubscriptionStats {
        let active_channels = self
            .shared
            .registry
            .lock()
            .values()
            .filter(|r| r.state == ChannelState::Subscribed)
            .count();
        let mut stats = self.shared.stats.lock().clone();
        stats.active_channels = active_channels;
        stats
    }

    /// Close everything before the process exits
    pub async fn shutdown(&self) {
        let count = self.unsubscribe_all().await;
        info!(channels = count, "Subscription manager shut down");
    }
}

/// Open the channel for `generation` and start pumping its signals
async fn open_and_attach(shared: &Arc<Shared>, key: &str, generation: u64) {
    let spec = {
        let registry = shared.registry.lock();
        match registry.get(key) {
            Some(r) if r.generation == generation => r.spec.clone(),
            _ => return,
        }
    };

    match shared.client.open_channel(spec).await {
        Ok(channel) => {
            let channel_id = channel.id;
            let attached = {
                let mut registry = shared.registry.lock();
                match registry.get_mut(key) {
                    Some(r) if r.generation == generation => {
                        r.channel_id = Some(channel_id);
                        r.pump = Some(tokio::spawn(pump_signals(
                            Arc::downgrade(shared),
                            key.to_string(),
                            generation,
                            channel.signals,
                        )));
                        true
                    }
                    _ => false,
                }
            };
            if !attached {
                debug!(key = %key, %channel_id, "Closing superseded channel");
                shared.client.close_channel(channel_id).await;
            }
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Failed to open realtime channel");
            handle_channel_failure(shared, key, generation, ChannelState::Errored, e.to_string());
        }
    }
}

async fn pump_signals(
    shared: Weak<Shared>,
    key: String,
    generation: u64,
    mut signals: mpsc::Receiver<ChannelSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        match signal {
            ChannelSignal::Change(raw) => deliver_change(&shared, &key, generation, raw),
            ChannelSignal::Status(ChannelStatus::Subscribed) => {
                mark_subscribed(&shared, &key, generation)
            }
            ChannelSignal::Status(status) => {
                let reason = match &status {
                    ChannelStatus::ChannelError(message) => message.clone(),
                    ChannelStatus::TimedOut => "channel timed out".to_string(),
                    _ => "channel closed unexpectedly".to_string(),
                };
                let state = ChannelState::from_status(&status);
                handle_channel_failure(&shared, &key, generation, state, reason);
                return;
            }
        }
    }

    if let Some(shared) = shared.upgrade() {
        handle_channel_failure(
            &shared,
            &key,
            generation,
            ChannelState::Closed,
            "signal stream ended".to_string(),
        );
    }
}

fn deliver_change(shared: &Shared, key: &str, generation: u64, raw: RawChange) {
    let handler = {
        let registry = shared.registry.lock();
        match registry.get(key) {
            Some(r) if r.generation == generation => Arc::clone(&r.handler),
            _ => return,
        }
    };

    match ChangeEvent::try_from(raw) {
        Ok(event) => {
            handler.handle_change(event);
            let mut stats = shared.stats.lock();
            stats.events_delivered += 1;
            stats.last_event_at = Some(Utc::now());
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Dropping unparseable change payload");
            shared.stats.lock().parse_errors += 1;
        }
    }
}

fn mark_subscribed(shared: &Shared, key: &str, generation: u64) {
    let mut registry = shared.registry.lock();
    if let Some(r) = registry.get_mut(key) {
        if r.generation == generation && r.state == ChannelState::Connecting {
            if r.reconnect_attempts > 0 {
                info!(key = %key, attempts = r.reconnect_attempts, "✅ Realtime channel recovered");
            } else {
                debug!(key = %key, "Realtime channel subscribed");
            }
            r.state = ChannelState::Subscribed;
            r.reconnect_attempts = 0;
        }
    }
}

/// Schedule a reconnect, or abandon the channel once its budget is spent
///
/// Only the first failure of a generation counts.
fn handle_channel_failure(
    shared: &Arc<Shared>,
    key: &str,
    generation: u64,
    failed_state: ChannelState,
    reason: String,
) {
    let abandoned = {
        let mut registry = shared.registry.lock();
        let Some(r) = registry.get_mut(key) else {
            return;
        };
        if r.generation != generation
            || !matches!(r.state, ChannelState::Connecting | ChannelState::Subscribed)
        {
            return;
        }

        // The pump is either finished or the caller itself
        r.pump = None;
        let stale = r.channel_id.take();

        if r.reconnect_attempts >= r.max_reconnect_attempts {
            r.state = ChannelState::Abandoned;
            if let Some(timer) = r.reconnect_timer.take() {
                timer.abort();
            }
            Some((
                Arc::clone(&r.handler),
                SubscriptionError::ChannelAbandoned {
                    key: key.to_string(),
                    attempts: r.reconnect_attempts,
                },
                stale,
            ))
        } else {
            r.state = failed_state;
            r.reconnect_attempts += 1;
            let attempt = r.reconnect_attempts;
            let delay = shared.backoff.delay_for(attempt);
            warn!(
                key = %key,
                reason = %reason,
                attempt,
                max_attempts = r.max_reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "Realtime channel failed, scheduling reconnect"
            );

            let weak = Arc::downgrade(shared);
            let timer_key = key.to_string();
            r.reconnect_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                reconnect_channel(weak, timer_key, generation).await;
            }));

            if let Some(id) = stale {
                shared.spawn_close(id);
            }
            let mut stats = shared.stats.lock();
            stats.reconnects_scheduled += 1;
            stats.last_error_at = Some(Utc::now());
            None
        }
    };

    if let Some((handler, error, stale)) = abandoned {
        error!(key = %key, reason = %reason, "❌ {}", error);
        if let Some(id) = stale {
            shared.spawn_close(id);
        }
        {
            let mut stats = shared.stats.lock();
            stats.channels_abandoned += 1;
            stats.last_error_at = Some(Utc::now());
        }
        handler.handle_channel_error(&error);
    }
}

/// Timer body: reopen the channel if the registration is still the one that failed
async fn reconnect_channel(shared: Weak<Shared>, key: String, generation: u64) {
    let Some(shared) = shared.upgrade() else {
        return;
    };

    let next = {
        let mut registry = shared.registry.lock();
        let Some(r) = registry.get_mut(&key) else {
            return;
        };
        if r.generation != generation {
            return;
        }
        // Detach our own handle so a later cancel cannot abort the open midway
        r.reconnect_timer = None;
        r.state = ChannelState::Connecting;
        r.generation = shared.next_generation();
        r.generation
    };

    debug!(key = %key, "Reconnecting realtime channel");
    open_and_attach(&shared, &key, next).await;
}
