//! Fixed-window arithmetic for rate limiting.
//!
//! Time is cut into non-overlapping windows of `size`. The counter for a
//! window lives under its index, `floor(now / size)`, and is allowed to
//! expire shortly after the window closes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::Timestamp;

/// Extra lifetime given to a bucket past the end of its window.
pub const BUCKET_GRACE: Duration = Duration::from_secs(1);

/// A fixed window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    size_ms: i64,
}

impl FixedWindow {
    /// Windows shorter than a millisecond are rounded up to one.
    pub fn new(size: Duration) -> Self {
        Self {
            size_ms: (size.as_millis() as i64).max(1),
        }
    }

    pub fn size(&self) -> Duration {
        Duration::from_millis(self.size_ms as u64)
    }

    /// Index of the window containing `now`.
    pub fn index_at(&self, now: Timestamp) -> i64 {
        now.timestamp_millis().div_euclid(self.size_ms)
    }

    /// Instant at which window `index` closes and the next one opens.
    pub fn reset_at(&self, index: i64) -> Timestamp {
        DateTime::from_timestamp_millis((index + 1).saturating_mul(self.size_ms))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// How long a bucket must live: the window rounded up to whole
    /// seconds, plus [`BUCKET_GRACE`].
    pub fn bucket_ttl(&self) -> Duration {
        let secs = (self.size_ms as u64).div_ceil(1000);
        Duration::from_secs(secs) + BUCKET_GRACE
    }
}

/// Result of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Timestamp,
}

impl RateDecision {
    /// Decision for the `count`-th request in a window capped at `limit`.
    pub fn from_count(count: u64, limit: u32, reset_at: Timestamp) -> Self {
        let allowed = count <= u64::from(limit);
        let remaining = if allowed {
            limit - count as u32
        } else {
            0
        };
        Self {
            allowed,
            limit,
            remaining,
            reset_at,
        }
    }

    /// Decision used when the counter could not be consulted.
    pub fn fail_open(limit: u32, reset_at: Timestamp) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at,
        }
    }
}
