//! Reconnect backoff policy
//!
//! Retry delays double from a base delay up to a ceiling. After a bounded
//! number of consecutive failures automatic retries stop until something
//! outside the session (foreground or network regained) resets the count.

use std::time::Duration;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default ceiling for any retry delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default number of automatic retries before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay for attempt 0
    pub base_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Attempts allowed before retries are abandoned
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based)
    ///
    /// `min(base * 2^attempt, max)`, saturating instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The full automatic retry schedule
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts).map(|n| self.delay_for(n)).collect()
    }
}

/// Consecutive-failure counter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconnectState {
    attempts: u32,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retries scheduled since the last successful connection
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether automatic retries have been used up
    pub fn is_exhausted(&self, policy: &ReconnectPolicy) -> bool {
        self.attempts >= policy.max_attempts
    }

    /// Claim the next retry
    ///
    /// Returns the delay to wait and counts the attempt, or `None` once the
    /// policy's attempt bound has been reached.
    pub fn next_delay(&mut self, policy: &ReconnectPolicy) -> Option<Duration> {
        if self.is_exhausted(policy) {
            return None;
        }
        let delay = policy.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }

    /// Forget all previous failures
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
