//! Retry policy for inventory fetches and active-spool lookups.
//!
//! Delays grow exponentially from `initial_delay_ms`, are capped at
//! `max_delay_ms`, and are shortened by a random jitter fraction so that
//! retries from concurrent fetches do not line up.

use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for failed fetch attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Fraction of each delay that may be randomly removed (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Timeout for a single attempt in milliseconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> f64 {
    0.2
}
fn default_attempt_timeout() -> u64 {
    5000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
            attempt_timeout_ms: default_attempt_timeout(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed), without jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay = self.initial_delay_ms as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Delay for an attempt with jitter applied.
    ///
    /// The result lies in `[delay * (1 - jitter), delay]`.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }

        let factor = 1.0 - self.jitter.min(1.0) * rng.gen::<f64>();
        base.mul_f64(factor)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Per-attempt timeout
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.backoff_multiplier < 1.0 {
            anyhow::bail!(
                "retry.backoff_multiplier must be >= 1.0 (got {})",
                self.backoff_multiplier
            );
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            anyhow::bail!("retry.jitter must be between 0.0 and 1.0 (got {})", self.jitter);
        }
        if self.attempt_timeout_ms == 0 {
            anyhow::bail!("retry.attempt_timeout_ms must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = RetryPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.attempt_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 10000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000)); // Capped
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            initial_delay_ms: 1000,
            jitter: 0.5,
            ..Default::default()
        };

        // StepRng(0, 0) always yields zero: no reduction
        let mut low = StepRng::new(0, 0);
        assert_eq!(policy.jittered_delay(1, &mut low), Duration::from_millis(1000));

        let mut rng = rand::thread_rng();
        for attempt in 1..=6 {
            let base = policy.delay_for_attempt(attempt);
            let delay = policy.jittered_delay(attempt, &mut rng);
            assert!(delay <= base);
            assert!(delay >= base.mul_f64(0.5));
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        let mut rng = rand::thread_rng();
        assert_eq!(policy.jittered_delay(3, &mut rng), policy.delay_for_attempt(3));
    }

    #[test]
    fn test_invalid_policies() {
        let zero_attempts = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(zero_attempts.validate().is_err());

        let shrinking = RetryPolicy {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(shrinking.validate().is_err());

        let wild_jitter = RetryPolicy {
            jitter: 1.5,
            ..Default::default()
        };
        assert!(wild_jitter.validate().is_err());
    }
}
