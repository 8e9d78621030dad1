//! Reconnection delay policy.

use std::time::Duration;

use backoff::backoff::Backoff;

use super::config::ReconnectConfig;

/// Capped exponential delay: `min(initial * 2^attempt, max)`.
///
/// Deterministic and side-effect free; callers decide when to sleep.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// A `max` below `initial` is raised to `initial` so every delay stays within
    /// `[initial, max]`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay to wait before retry number `attempt` (zero-based).
    ///
    /// Saturates at `max` when the shift or the multiplication would overflow.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        1_u32
            .checked_shl(attempt)
            .and_then(|factor| self.initial.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.initial_backoff, config.max_backoff)
    }
}

/// Retry counter paired with its [`BackoffPolicy`].
///
/// Every call to [`Backoff::next_backoff`] records one more consecutive failure and
/// returns the delay for that retry, or `None` once the counter exceeds the configured
/// maximum.
#[derive(Debug, Clone)]
pub(crate) struct RetrySchedule {
    policy: BackoffPolicy,
    max_attempts: Option<u32>,
    attempts: u32,
}

impl RetrySchedule {
    /// Consecutive failures since the last successful connect.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempts > max)
    }
}

impl From<&ReconnectConfig> for RetrySchedule {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            policy: config.into(),
            max_attempts: config.max_attempts,
            attempts: 0,
        }
    }
}

impl Backoff for RetrySchedule {
    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);

        if self.is_exhausted() {
            return None;
        }

        // The Nth retry waits for the Nth step, which is zero-based in the policy
        Some(self.policy.next_delay(self.attempts - 1))
    }
}
