//! Bounded exponential backoff for handoff delivery.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// How often and how patiently a delivery is retried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure (milliseconds).
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay (milliseconds).
    pub max_backoff_ms: u64,
    /// Randomize each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits; for tests and local tooling.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            jitter: false,
        }
    }

    /// Longest single wait, also applied to server-provided retry hints.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Delay to wait after `attempt` (1-based) has failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let base = self
            .initial_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_ms);

        let millis = if self.jitter && base > 1 {
            rand::thread_rng().gen_range(base / 2..=base)
        } else {
            base
        };
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(30_000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default();
        for attempt in 1..=6 {
            let ceiling = RetryPolicy {
                jitter: false,
                ..RetryPolicy::default()
            }
            .delay_for(attempt);
            let delay = policy.delay_for(attempt);
            assert!(delay <= ceiling);
            assert!(delay >= ceiling / 2);
        }
    }

    #[test]
    fn test_max_delay() {
        assert_eq!(RetryPolicy::default().max_delay(), Duration::from_secs(30));
        assert_eq!(RetryPolicy::immediate(3).max_delay(), Duration::ZERO);
    }

    #[test]
    fn test_immediate_policy() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(2), Duration::ZERO);
    }
}
