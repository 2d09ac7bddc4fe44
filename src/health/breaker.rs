//! # Probe Circuit Breaker
//!
//! Counts consecutive failed probes. Once the count reaches the threshold every further
//! failure (re)opens the breaker for a cooldown window, during which no probe may run.
//! A single success closes it and zeroes the count.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Breaker state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Probes allowed
    Closed,
    /// Probes suspended until the cooldown elapses
    Open,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

#[derive(Debug)]
pub struct ProbeCircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl ProbeCircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        debug!(
            failure_threshold,
            cooldown_ms = cooldown.as_millis() as u64,
            "🛡️ Probe circuit breaker initialized"
        );
        Self {
            failure_threshold,
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn state(&self) -> CircuitState {
        if self.remaining().is_some() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Time left in the current cooldown, `None` when closed
    pub fn remaining(&self) -> Option<Duration> {
        let state = self.state.lock();
        let open_until = state.open_until?;
        let now = Instant::now();
        (now < open_until).then(|| open_until - now)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.consecutive_failures > 0 {
            info!(
                previous_failures = state.consecutive_failures,
                "🟢 Backend probe succeeded, failure count reset"
            );
        }
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    /// Count a failure; returns true when this failure opened the breaker
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        if state.consecutive_failures >= self.failure_threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            error!(
                consecutive_failures = state.consecutive_failures,
                failure_threshold = self.failure_threshold,
                cooldown_secs = self.cooldown.as_secs(),
                "🔴 Circuit breaker opened, suspending backend probes"
            );
            true
        } else {
            debug!(
                consecutive_failures = state.consecutive_failures,
                failure_threshold = self.failure_threshold,
                "Backend probe failed"
            );
            false
        }
    }

    pub fn reset(&self) {
        *self.state.lock() = BreakerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let breaker = ProbeCircuitBreaker::new(3, Duration::from_secs(30));
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Closed);

        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.remaining(), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_elapses() {
        let breaker = ProbeCircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.remaining(), Some(Duration::from_secs(20)));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        // Count is kept until a success, so the next failure reopens immediately
        assert_eq!(breaker.consecutive_failures(), 1);
        assert!(breaker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets() {
        let breaker = ProbeCircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(!breaker.record_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let breaker = ProbeCircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_failure();
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }
}
