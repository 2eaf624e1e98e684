//! Tunables for delivery and polling

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry discipline applied to every candidate channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per candidate channel
    pub attempts: u32,
    /// Delay after the first failed attempt; doubles afterwards
    pub base_delay: Duration,
    /// Upper bound of a single backoff delay
    pub max_delay: Duration,
    /// Bound on one transport call
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Attempts per candidate, never less than one
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Delay to wait after the `failed`-th failed attempt (1-based)
    #[must_use]
    pub fn backoff(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Poll interval per monitored attribute group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollIntervals {
    pub lock_state: Duration,
    pub diagnostics: Duration,
    pub battery: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            lock_state: Duration::from_secs(60),
            diagnostics: Duration::from_secs(120),
            battery: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30]);
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let policy = RetryPolicy {
            attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
    }
}
