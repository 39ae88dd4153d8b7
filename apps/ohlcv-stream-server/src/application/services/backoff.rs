//! Poll Backoff
//!
//! Exponential backoff with jitter for a poll loop whose fetches keep
//! failing. The base wait is the loop's normal poll interval; each
//! consecutive failure multiplies it, up to a ceiling. One success resets it.

use std::time::Duration;

use rand::Rng;

/// Backoff tuning.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Ceiling for the stretched interval.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Per-loop backoff state.
#[derive(Debug)]
pub struct PollBackoff {
    config: BackoffConfig,
    base: Duration,
    failures: u32,
}

impl PollBackoff {
    /// Start with `base` as the healthy poll interval.
    #[must_use]
    pub const fn new(base: Duration, config: BackoffConfig) -> Self {
        Self {
            config,
            base,
            failures: 0,
        }
    }

    /// Wait before the next poll.
    ///
    /// Equals the base interval while healthy; grows with each recorded
    /// failure and carries jitter once stretched.
    #[must_use]
    pub fn next_delay(&self) -> Duration {
        if self.failures == 0 {
            return self.base;
        }

        let exponent = i32::try_from(self.failures).unwrap_or(i32::MAX);
        let scaled = self.base.as_secs_f64() * self.config.multiplier.powi(exponent);
        let capped = if scaled.is_finite() {
            scaled.min(self.config.max_delay.as_secs_f64())
        } else {
            self.config.max_delay.as_secs_f64()
        };

        self.apply_jitter(Duration::from_secs_f64(capped.max(self.base.as_secs_f64())))
    }

    /// Count one failed poll.
    pub const fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Return to the base interval after a successful poll.
    pub const fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        let base_secs = duration.as_secs_f64();
        let range = base_secs * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((base_secs + jitter).max(0.001))
    }
}
