//! Reconnection budget and exponential backoff.
//!
//! Tracks the current failure streak. The n-th consecutive failure waits
//! `min(base * 2^n, cap)` before the next automatic attempt — with the
//! default base of 5000 ms and cap of 30000 ms the observable delays are
//! 10000, 20000, 30000, 30000, … No jitter is applied. A successful
//! connection resets the streak, so backoff is per failure-streak rather
//! than cumulative over the process lifetime.

use std::time::Duration;

use crate::config::RetryConfig;

/// Failure-streak counter with bounded exponential delays.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    attempts_made: u32,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryBudget {
    /// Build a fresh budget from the retry configuration.
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempts_made: 0,
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Record one failed connection attempt.
    pub fn record_failure(&mut self) {
        self.attempts_made = self.attempts_made.saturating_add(1);
    }

    /// Reset the streak after a successful connection.
    pub fn reset(&mut self) {
        self.attempts_made = 0;
    }

    /// Whether the automatic-retry budget is spent.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    /// Consecutive failures recorded in the current streak.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts_made
    }

    /// Delay before the next automatic attempt: `min(base * 2^n, cap)`
    /// where `n` is the streak length after its post-failure increment.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let cap_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        // 2^63 already saturates any practical cap; avoid the shift overflow.
        let factor = 1u64
            .checked_shl(self.attempts_made.min(63))
            .unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor).min(cap_ms);
        Duration::from_millis(delay_ms)
    }
}
