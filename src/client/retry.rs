// src/client/retry.rs

use rand::Rng;
use std::time::Duration;

/// Retry policy of a single `request` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
    /// Attempts shared by key acquisition and rate-limited retries
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    /// Clamped to `[0, 1]` when the delay is computed.
    pub jitter_ratio: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(2000),
            jitter_ratio: 0.15,
        }
    }
}

impl RetryOptions {
    /// Applies per-call overrides on top of these options.
    pub fn merged(&self, overrides: &RetryOverrides) -> Self {
        Self {
            max_attempts: overrides.max_attempts.unwrap_or(self.max_attempts),
            base_delay: overrides.base_delay.unwrap_or(self.base_delay),
            max_delay: overrides.max_delay.unwrap_or(self.max_delay),
            jitter_ratio: overrides.jitter_ratio.unwrap_or(self.jitter_ratio),
        }
    }

    /// Capped exponential delay before attempt `attempt + 1`, without jitter.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// `min(base * 2^(attempt-1), max) * (1 + jitter_ratio * r)`, `r` in `[0, 1)`.
    ///
    /// Jitter only ever adds to the capped delay.
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let r: f64 = rand::thread_rng().gen();
        self.delay_with_jitter(attempt, r)
    }

    pub(crate) fn delay_with_jitter(&self, attempt: u32, r: f64) -> Duration {
        let capped = self.capped_delay(attempt);
        let jitter = self.jitter_ratio.clamp(0.0, 1.0) * r;
        if jitter.is_nan() || jitter <= 0.0 {
            return capped;
        }
        Duration::try_from_secs_f64(capped.as_secs_f64() * (1.0 + jitter)).unwrap_or(capped)
    }
}

/// Partial [`RetryOptions`]; unset fields fall back to the client defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub jitter_ratio: Option<f64>,
}

impl RetryOverrides {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = Some(base_delay);
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = Some(jitter_ratio);
        self
    }
}
