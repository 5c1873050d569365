//! Retry policy: decides backoff delays and when to give up.

use std::time::Duration;

/// Retry policy for items whose processing failed.
///
/// `attempts` below is the item's claim count, which the store bumps on every
/// successful claim, so it also counts deliveries lost to crashed workers.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Claims allowed before the item is dead-lettered. `None` retries forever.
    pub max_attempts: Option<u32>,

    /// Base delay for the first retry. Zero releases immediately.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Retry forever, immediately.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before the next claim, after `attempts` failed ones (1-indexed).
    ///
    /// `base_delay * multiplier^(attempts - 1)`, e.g. with base 2s and
    /// multiplier 2.0: 2s, 4s, 8s, 16s.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }

    /// Has an item on its `attempts`-th claim used up its budget?
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts > max)
    }
}

impl Default for RetryPolicy {
    /// Five attempts, released immediately on failure.
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            base_delay: Duration::ZERO,
            multiplier: 2.0,
        }
    }
}
