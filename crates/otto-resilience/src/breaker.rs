// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use otto_config::CircuitBreakerConfig;

use crate::clock::{Clock, MonotonicClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at_millis: u64,
}

/// Consecutive-failure circuit breaker gating provider calls.
///
/// Closed → (threshold consecutive failures) → Open → (reset_timeout) →
/// HalfOpen → success closes / failure re-opens.  While Open, `allow()`
/// returns false and the caller fails fast without issuing the call.
/// Exactly one probe is admitted in HalfOpen.
///
/// All transitions happen under one mutex held only for the state
/// read-and-mutate.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<Inner>>,
    failure_threshold: u32,
    reset_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at_millis: 0,
            })),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn from_config(cfg: &CircuitBreakerConfig) -> Self {
        Self::new(
            cfg.failure_threshold,
            Duration::from_millis(cfg.reset_timeout_ms),
        )
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Whether a call may be issued right now.
    ///
    /// In Open state, the first `allow()` after `reset_timeout` transitions
    /// to HalfOpen and admits a single probe; further calls are rejected
    /// until the probe's result is recorded.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = self
                    .clock
                    .now_millis()
                    .saturating_sub(inner.opened_at_millis);
                if elapsed >= self.reset_timeout.as_millis() as u64 {
                    debug!("circuit breaker half-open; admitting probe");
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            // The single probe is already in flight.
            BreakerState::HalfOpen => false,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != BreakerState::Closed {
            debug!("circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                warn!("circuit breaker probe failed; re-opening");
                inner.state = BreakerState::Open;
                inner.opened_at_millis = self.clock.now_millis();
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.state == BreakerState::Closed
                    && inner.consecutive_failures >= self.failure_threshold
                {
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at_millis = self.clock.now_millis();
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn breaker_with_clock(threshold: u32, timeout_ms: u64) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let b = CircuitBreaker {
            inner: Arc::new(Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at_millis: 0,
            })),
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(timeout_ms),
            clock: clock.clone(),
        };
        (b, clock)
    }

    #[test]
    fn stays_closed_below_threshold() {
        let (b, _) = breaker_with_clock(3, 100);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn opens_at_threshold_and_rejects() {
        let (b, _) = breaker_with_clock(2, 100);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn success_resets_consecutive_count() {
        let (b, _) = breaker_with_clock(2, 100);
        b.record_failure();
        b.record_success();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    /// After `failure_threshold` consecutive failures, `allow()` returns
    /// false for exactly `reset_timeout`, then returns true exactly once;
    /// the following result determines the next state.
    #[test]
    fn half_open_admits_exactly_one_probe() {
        let (b, clock) = breaker_with_clock(2, 100);
        b.record_failure();
        b.record_failure();
        assert!(!b.allow());
        clock.advance(99);
        assert!(!b.allow(), "still inside reset_timeout");
        clock.advance(1);
        assert!(b.allow(), "first allow after timeout admits the probe");
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(!b.allow(), "second allow is rejected while probe in flight");
    }

    #[test]
    fn probe_success_closes() {
        let (b, clock) = breaker_with_clock(1, 50);
        b.record_failure();
        clock.advance(50);
        assert!(b.allow());
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[test]
    fn probe_failure_reopens_with_fresh_timeout() {
        let (b, clock) = breaker_with_clock(1, 50);
        b.record_failure();
        clock.advance(50);
        assert!(b.allow());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        clock.advance(49);
        assert!(!b.allow(), "re-opened breaker restarts the timeout");
        clock.advance(1);
        assert!(b.allow());
    }
}
