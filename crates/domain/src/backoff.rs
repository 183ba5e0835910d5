//! Retry backoff
//!
//! Exponential backoff expressed as data (initial delay, multiplier, cap)
//! so the schedule can be persisted with the record and resumed across
//! restarts.

use faro_shared::config::BackoffConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            config.initial_delay(),
            config.multiplier,
            config.max_delay(),
        )
    }

    /// Delay before the next attempt, given the number of failed attempts
    /// so far (1-based: after the first failure pass `1`).
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let delay =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent.min(63) as i32);
        Duration::from_secs_f64(delay).min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), 2.0, Duration::from_secs(30))
    }
}
