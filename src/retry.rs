//! Bounded-attempt retry with exponential backoff.
//!
//! Retry behavior is data, not control flow: generators and backward engines
//! hold a [`RetryPolicy`] and ask it for the delay before attempt `n`. Tests
//! use [`RetryPolicy::immediate`] so retry bounds can be asserted without
//! sleeping.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule with an attempt bound.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Must be at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per retry.
    pub factor: f64,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            factor: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy with `max_attempts` attempts and no sleeping between them.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            factor: 1.0,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay to sleep before retry number `retry` (1-based: the delay after
    /// the first failed attempt is `delay(1)`).
    pub fn delay(&self, retry: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = self.factor.powi(retry.saturating_sub(1) as i32);
        let base = self.initial_delay.as_secs_f64() * exp;
        let capped = base.min(self.max_delay.as_secs_f64());
        let with_jitter = if self.jitter {
            capped * (1.0 + rand::rng().random_range(0.0..0.1))
        } else {
            capped
        };
        Duration::from_secs_f64(with_jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: false,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            factor: 10.0,
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.delay(4), Duration::from_secs(5));
    }

    #[test]
    fn immediate_policy_never_sleeps() {
        let policy = RetryPolicy::immediate(4);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.delay(1), Duration::ZERO);
        assert_eq!(policy.delay(3), Duration::ZERO);
    }
}
