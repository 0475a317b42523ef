//! Retry policy: decides backoff delays

use crate::config::QueueConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter for failed jobs
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt
    pub base_delay: Duration,

    /// Upper bound for any delay
    pub max_delay: Duration,

    /// Growth factor per attempt
    pub multiplier: f64,

    /// Scale each delay by a random factor in [0.5, 1.0]
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Un-jittered delay after `attempts` failed attempts (1-indexed)
    ///
    /// `min(max_delay, base_delay * multiplier^(attempts - 1))`
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let delay = self.backoff(attempts);
        if !self.jitter {
            return delay;
        }

        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(20),
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(5), Duration::from_secs(20));
        assert_eq!(policy.backoff(500), Duration::from_secs(20));
    }

    #[test]
    fn test_zero_attempts_uses_base() {
        assert_eq!(policy().backoff(0), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_half_and_full() {
        let mut policy = policy();
        policy.jitter = true;

        for _ in 0..100 {
            let delay = policy.next_delay(2);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(4));
        }
    }
}
