//! Retry policy: decides backoff delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay for every retry.
    Fixed,
    #[default]
    Exponential,
}

/// Retry policy for transient delivery failures.
///
/// Delays are stored in seconds so the policy can live in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,

    /// Delay before the first retry.
    pub base_delay_secs: u64,

    /// Growth factor for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_secs: 60,
            multiplier: 2.0,
            max_delay_secs: 3600,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay_secs: delay.as_secs(),
            multiplier: 1.0,
            max_delay_secs: delay.as_secs(),
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    ///
    /// Exponential: `base * multiplier^(retry - 1)`, capped at `max_delay`.
    /// With base=60s, multiplier=2.0: 60s, 120s, 240s, ...
    pub fn next_delay(&self, retry: u32) -> Duration {
        let base = self.base_delay_secs as f64;
        let secs = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let exponent = retry.saturating_sub(1).min(63) as i32;
                base * self.multiplier.powi(exponent)
            }
        };
        let capped = secs.min(self.max_delay_secs as f64).max(0.0);
        Duration::from_secs_f64(capped)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_secs == 0 {
            return Err("retry.base_delay_secs must be > 0".to_string());
        }
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err(format!("retry.multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if self.max_delay_secs < self.base_delay_secs {
            return Err("retry.max_delay_secs must be >= retry.base_delay_secs".to_string());
        }
        Ok(())
    }
}
