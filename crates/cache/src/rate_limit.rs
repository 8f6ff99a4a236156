//! Fixed-window rate limiter.
//!
//! Each `(identity, window index)` pair owns one counter. A check is one
//! atomic increment; the first increment of a window also sets the
//! counter's expiry to the window size plus a grace margin, so stale
//! buckets clean themselves up.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codearena_core::{Clock, FixedWindow, RateDecision, Timestamp};
use redis::aio::ConnectionManager;
use redis::Script;
use tokio::sync::Mutex;

use crate::CacheError;

/// Atomic increment-and-maybe-expire, in one round trip.
const INCR_WINDOW: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Counter storage for rate buckets.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new count. When the count becomes 1,
    /// the key expires after `ttl`. Must be atomic.
    async fn incr_window(&self, key: &str, ttl: Duration) -> Result<u64, CacheError>;
}

pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(INCR_WINDOW),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_window(&self, key: &str, ttl: Duration) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .script
            .key(key)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }
}

/// In-process counters with clock-driven expiry.
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (u64, Timestamp)>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.counters.lock().await.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_window(&self, key: &str, ttl: Duration) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let mut counters = self.counters.lock().await;
        counters.retain(|_, (_, expires_at)| *expires_at > now);

        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let entry = counters.entry(key.to_string()).or_insert((0, expires_at));
        entry.0 += 1;
        Ok(entry.0)
    }
}

/// Window size and per-window allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(60_000),
            max_requests: 5,
        }
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    window: FixedWindow,
    max_requests: u32,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            window: FixedWindow::new(config.window),
            max_requests: config.max_requests,
            clock,
        }
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }

    /// Counter key of `identity` in window `index`.
    pub fn bucket_key(identity: &str, index: i64) -> String {
        format!("ratelimit:{identity}:{index}")
    }

    /// Count one request for `identity`.
    ///
    /// If the counter store is unreachable the request is allowed and the
    /// failure logged.
    pub async fn allow(&self, identity: &str) -> RateDecision {
        let index = self.window.index_at(self.clock.now());
        let reset_at = self.window.reset_at(index);
        let key = Self::bucket_key(identity, index);

        match self.store.incr_window(&key, self.window.bucket_ttl()).await {
            Ok(count) => {
                let decision = RateDecision::from_count(count, self.max_requests, reset_at);
                if !decision.allowed {
                    tracing::warn!(
                        identity,
                        count,
                        limit = self.max_requests,
                        reset_at = %reset_at,
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                tracing::error!(identity, error = %e, "Rate limiter unavailable, allowing request");
                RateDecision::fail_open(self.max_requests, reset_at)
            }
        }
    }

    /// Intake variant: an identity is mandatory.
    pub async fn check_submission(
        &self,
        identity: Option<&str>,
    ) -> Result<RateDecision, CacheError> {
        match identity.map(str::trim).filter(|id| !id.is_empty()) {
            Some(identity) => Ok(self.allow(identity).await),
            None => Err(CacheError::MissingIdentity),
        }
    }
}
