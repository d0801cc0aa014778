//! Consecutive-throttle circuit breaker.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Throttled responses in a row before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit rejects requests.
pub const DEFAULT_OPEN_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { remaining: Duration },
}

#[derive(Debug)]
struct Inner {
    consecutive: u32,
    open_until: Option<Instant>,
}

/// Opens after `threshold` consecutive throttled responses and stays open for
/// `open_for`. Any non-throttled outcome closes it again.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    open_for: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, open_for: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            open_for,
            inner: Mutex::new(Inner {
                consecutive: 0,
                open_until: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        match inner.open_until {
            Some(until) => {
                let now = Instant::now();
                if now >= until {
                    // Half-open: let the next request through, one more throttle re-opens.
                    inner.open_until = None;
                    inner.consecutive = self.threshold.saturating_sub(1);
                    CircuitState::Closed
                } else {
                    CircuitState::Open {
                        remaining: until - now,
                    }
                }
            }
            None => CircuitState::Closed,
        }
    }

    pub fn record_throttled(&self) {
        let mut inner = self.lock();
        inner.consecutive = inner.consecutive.saturating_add(1);
        if inner.consecutive >= self.threshold && inner.open_until.is_none() {
            warn!(
                consecutive = inner.consecutive,
                open_secs = self.open_for.as_secs(),
                "Throttling circuit opened"
            );
            inner.open_until = Some(Instant::now() + self.open_for);
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive = 0;
        inner.open_until = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned breaker only ever holds counters; keep using them.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_DURATION)
    }
}
