// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
//! Retry delay computation: exponential backoff with jitter, plus
//! provider-directed overrides.

use std::time::Duration;

use rand::Rng;

use otto_config::RetryConfig;

/// Ceiling applied to provider-directed hints so a hostile or broken
/// `Retry-After` header cannot stall a driver indefinitely.
const HINT_CAP: Duration = Duration::from_secs(20);

/// Jitter added on top of a provider-directed hint.
const HINT_JITTER_MAX: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub use_provider_backoff: bool,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier.max(1.0),
            use_provider_backoff: cfg.use_provider_backoff,
        }
    }

    /// `min(initial_delay * multiplier^(n-1), max_delay)` for 1-indexed `n`,
    /// without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = self.multiplier.powi(exp.min(63) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Base delay with uniform ±10 % jitter.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        apply_jitter(self.base_delay(attempt))
    }
}

fn apply_jitter(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}

/// Per-call-sequence backoff state.
///
/// Tracks whether the previous attempt's delay came from a provider hint:
/// a hint that was honoured and still led to a transient server failure is
/// no longer trusted, and the schedule falls back to exponential backoff
/// with the attempt index doubled.
#[derive(Debug, Default)]
pub struct BackoffState {
    hint_used_last: bool,
}

impl BackoffState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay before retrying `attempt` (the 1-indexed attempt that just
    /// failed).  `retry_after` is the server hint from the failed attempt,
    /// `transient_server` whether the failure was a transient server error.
    pub fn next_delay(
        &mut self,
        policy: &RetryPolicy,
        attempt: u32,
        retry_after: Option<Duration>,
        transient_server: bool,
    ) -> Duration {
        let hint_burned = self.hint_used_last && transient_server;
        if policy.use_provider_backoff && !hint_burned {
            if let Some(hint) = retry_after {
                self.hint_used_last = true;
                let jitter = rand::thread_rng()
                    .gen_range(Duration::ZERO..=HINT_JITTER_MAX);
                return hint.min(HINT_CAP) + jitter;
            }
        }
        let index = if hint_burned { attempt.saturating_mul(2) } else { attempt };
        self.hint_used_last = false;
        policy.jittered_delay(index)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            use_provider_backoff: true,
        }
    }

    // ── Base delay ────────────────────────────────────────────────────────────

    #[test]
    fn base_delay_doubles_each_attempt() {
        let p = policy(100, 100_000, 2.0);
        assert_eq!(p.base_delay(1), Duration::from_millis(100));
        assert_eq!(p.base_delay(2), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(400));
        assert_eq!(p.base_delay(5), Duration::from_millis(1_600));
    }

    #[test]
    fn base_delay_respects_cap() {
        let p = policy(100, 1_000, 2.0);
        assert_eq!(p.base_delay(5), Duration::from_millis(1_000));
        assert_eq!(p.base_delay(20), Duration::from_millis(1_000));
    }

    #[test]
    fn base_delay_large_attempt_does_not_overflow() {
        let p = policy(1_000, 10_000, 2.0);
        assert_eq!(p.base_delay(500), Duration::from_millis(10_000));
    }

    /// Delay bounds: jittered delay stays within ±10 % of the capped
    /// exponential for every attempt index.
    #[test]
    fn jittered_delay_within_ten_percent_of_base() {
        let p = policy(50, 5_000, 2.0);
        for attempt in 1..=12 {
            let base = p.base_delay(attempt).as_millis() as f64;
            for _ in 0..50 {
                let d = p.jittered_delay(attempt).as_millis() as f64;
                assert!(
                    d >= (base * 0.9).floor() && d <= (base * 1.1).ceil(),
                    "attempt {attempt}: {d} outside [{}, {}]",
                    base * 0.9,
                    base * 1.1
                );
            }
        }
    }

    // ── Provider hints ────────────────────────────────────────────────────────

    #[test]
    fn hint_is_honoured_with_bounded_jitter() {
        let p = policy(100, 10_000, 2.0);
        let mut state = BackoffState::new();
        let d = state.next_delay(&p, 1, Some(Duration::from_secs(3)), true);
        assert!(d >= Duration::from_secs(3));
        assert!(d <= Duration::from_secs(3) + Duration::from_millis(100));
    }

    #[test]
    fn hint_is_capped() {
        let p = policy(100, 10_000, 2.0);
        let mut state = BackoffState::new();
        let d = state.next_delay(&p, 1, Some(Duration::from_secs(600)), true);
        assert!(d <= Duration::from_secs(20) + Duration::from_millis(100));
    }

    #[test]
    fn burned_hint_falls_back_to_doubled_exponential() {
        let p = policy(100, 100_000, 2.0);
        let mut state = BackoffState::new();
        // Attempt 1 fails with a hint — honoured.
        let _ = state.next_delay(&p, 1, Some(Duration::from_millis(50)), true);
        // Attempt 2 fails again with a transient server error and another
        // hint: the hint is no longer trusted; index doubles to 4 →
        // base 100 * 2^3 = 800 ms (±10 %).
        let d = state.next_delay(&p, 2, Some(Duration::from_millis(50)), true);
        let ms = d.as_millis();
        assert!((720..=880).contains(&ms), "expected ~800ms, got {ms}");
    }

    #[test]
    fn hint_trusted_again_after_non_server_failure() {
        let p = policy(100, 100_000, 2.0);
        let mut state = BackoffState::new();
        let _ = state.next_delay(&p, 1, Some(Duration::from_millis(50)), true);
        // A non-transient-server failure (e.g. rate limit) does not burn the hint.
        let d = state.next_delay(&p, 2, Some(Duration::from_millis(50)), false);
        assert!(d <= Duration::from_millis(150));
    }

    #[test]
    fn no_hint_uses_policy_backoff() {
        let p = policy(100, 100_000, 2.0);
        let mut state = BackoffState::new();
        let d = state.next_delay(&p, 3, None, true);
        let ms = d.as_millis();
        // base 400 ms ± 10 %
        assert!((360..=440).contains(&ms), "expected ~400ms, got {ms}");
    }

    #[test]
    fn disabled_provider_backoff_ignores_hint() {
        let mut p = policy(100, 100_000, 2.0);
        p.use_provider_backoff = false;
        let mut state = BackoffState::new();
        let d = state.next_delay(&p, 1, Some(Duration::from_secs(19)), true);
        assert!(d <= Duration::from_millis(110), "hint must be ignored: {d:?}");
    }
}
