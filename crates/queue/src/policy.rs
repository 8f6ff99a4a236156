//! Retry and retention policies.

use std::time::Duration;

/// Exponential backoff between attempts: `base * 2^(attempt - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// An active job claimed longer ago than this is treated as a crashed
    /// attempt and goes through the failure path.
    pub stall_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            stall_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following the failed `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exp)
    }

    /// Whether another attempt follows the failed `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn stall_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.stall_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

/// How many finished jobs of one kind to keep, and for how long.
///
/// Whichever bound is hit first applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_count: usize,
    pub max_age: Duration,
}

impl RetentionPolicy {
    pub fn completed() -> Self {
        Self {
            max_count: 1000,
            max_age: Duration::from_secs(60 * 60),
        }
    }

    pub fn failed() -> Self {
        Self {
            max_count: 500,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn max_age_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX)
    }
}
