//! Fan-out of [`ConfigChangeEvent`]s to any number of listeners.

use tokio::sync::broadcast;
use tracing::debug;

use super::ConfigChangeEvent;

/// Publishes configuration changes over a broadcast channel
///
/// Listeners that fall behind lose the oldest events; only the latest resolution
/// matters to them.
#[derive(Debug, Clone)]
pub struct ConfigEventPublisher {
    sender: broadcast::Sender<ConfigChangeEvent>,
}

impl ConfigEventPublisher {
    /// Create a new publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; having no listeners is fine
    pub fn publish(&self, event: ConfigChangeEvent) {
        if self.sender.send(event).is_err() {
            debug!("No configuration listeners registered");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ConfigEventPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}
