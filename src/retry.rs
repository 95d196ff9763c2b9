//! Retry and backoff policy for calls to external collaborators.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts
    #[serde(default)]
    pub backoff: BackoffConfig,
}

const fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), or `None` once
    /// attempts are exhausted
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            None
        } else {
            Some(self.backoff.delay_for_attempt(attempt))
        }
    }
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Fixed delay between attempts.
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },

    /// Exponential backoff.
    Exponential {
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        #[serde(with = "humantime_serde")]
        max_delay: Duration,

        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },

    /// Linear backoff.
    Linear {
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,

        #[serde(with = "humantime_serde")]
        increment: Duration,

        #[serde(with = "humantime_serde")]
        max_delay: Duration,
    },
}

const fn default_multiplier() -> f64 {
    2.0
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: default_multiplier(),
        }
    }
}

impl BackoffConfig {
    /// Delay after the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let secs = initial_delay.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
                    *max_delay
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
            Self::Linear {
                initial_delay,
                increment,
                max_delay,
            } => initial_delay
                .saturating_add(increment.saturating_mul(attempt - 1))
                .min(*max_delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff() {
        let backoff = BackoffConfig::Exponential {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        };

        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(10));
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_backoff() {
        let backoff = BackoffConfig::Linear {
            initial_delay: Duration::from_millis(500),
            increment: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };

        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(1500));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(2));
    }

    #[test]
    fn test_policy_exhaustion() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: BackoffConfig::Fixed {
                delay: Duration::from_millis(100),
            },
        };

        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_after(3), None);
    }

    #[test]
    fn test_backoff_from_toml() {
        let policy: RetryPolicy = toml::from_str(
            r#"
            max_attempts = 4

            [backoff]
            type = "fixed"
            delay = "250ms"
            "#,
        )
        .unwrap();

        assert_eq!(policy.max_attempts, 4);
        assert_eq!(
            policy.backoff,
            BackoffConfig::Fixed {
                delay: Duration::from_millis(250)
            }
        );
    }
}
