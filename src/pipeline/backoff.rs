//! Exponential backoff for transient cycle failures.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Doubling delay with jitter, capped at a maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    /// 0 = unlimited.
    max_attempts: usize,
    attempts: usize,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        let initial = Duration::from_millis(config.initial_backoff_ms);
        Self {
            initial,
            max: Duration::from_secs(config.max_backoff_secs).max(initial),
            max_attempts: config.max_attempts,
            attempts: 0,
        }
    }

    /// Consecutive failed attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Register a failed attempt and return how long to wait before the
    /// next one, or `None` once the attempt limit is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.max_attempts > 0 && self.attempts >= self.max_attempts {
            return None;
        }

        let exponent = (self.attempts - 1).min(31) as u32;
        let base = self.initial.saturating_mul(1u32 << exponent).min(self.max);
        let jitter_ms = base.as_millis() as u64 / 10;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        Some((base + jitter).min(self.max))
    }

    /// Forget previous failures after a successful cycle.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
