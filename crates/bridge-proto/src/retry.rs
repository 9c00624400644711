//! Retry/backoff policy for the server-side dispatcher.
//!
//! The deterministic part of the formula is split out from the jitter draw
//! so tests can assert the former exactly while only bounding the latter.

use std::time::Duration;

/// Total dispatches allowed per `call()`.
pub const MAX_ATTEMPTS: u32 = 3;
pub const BASE_RETRY_BACKOFF_MS: u64 = 150;
pub const MAX_RETRY_BACKOFF_MS: u64 = 2_000;
pub const RETRY_JITTER_MAX_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(BASE_RETRY_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_RETRY_BACKOFF_MS),
            jitter_max: Duration::from_millis(RETRY_JITTER_MAX_MS),
        }
    }
}

impl RetryConfig {
    /// Deterministic backoff component for attempt `n` (1-indexed), before
    /// jitter: `min(max_backoff, base_backoff * 2^(n-1))`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_backoff.saturating_mul(multiplier);
        std::cmp::min(delay, self.max_backoff)
    }

    /// Draws a uniform jitter in `[0, jitter_max)`.
    pub fn jitter(&self) -> Duration {
        if self.jitter_max.is_zero() {
            return Duration::ZERO;
        }
        let max_millis = self.jitter_max.as_millis().max(1) as u64;
        let drawn = rand::random::<u64>() % max_millis;
        Duration::from_millis(drawn)
    }

    /// Full delay before attempt `n`: deterministic backoff plus jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff_for_attempt(attempt) + self.jitter()
    }
}
