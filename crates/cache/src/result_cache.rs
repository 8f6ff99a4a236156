//! Terminal-result cache.
//!
//! Only [`TerminalSnapshot`]s can be stored, so a `Queued` or `Running`
//! view never reaches the cache. Backend failures never fail the caller:
//! `get` degrades to a miss and `put` is logged and dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codearena_core::{Clock, SubmissionId, TerminalSnapshot, Timestamp};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use crate::CacheError;

/// Default time-to-live of a cached result: one hour.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(60 * 60);

#[async_trait]
pub trait ResultCache: Send + Sync {
    /// The cached terminal result, or `None` on a miss, an expired entry or
    /// a backend failure.
    async fn get(&self, id: &SubmissionId) -> Option<TerminalSnapshot>;

    async fn put(&self, snapshot: TerminalSnapshot, ttl: Duration);
}

pub fn cache_key(id: &SubmissionId) -> String {
    format!("submission:{id}")
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RedisResultCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisResultCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisResultCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn try_get(&self, id: &SubmissionId) -> Result<Option<TerminalSnapshot>, CacheError> {
        let mut conn = self.conn.clone();
        let data: Option<String> = conn.get(cache_key(id)).await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn try_put(&self, snapshot: &TerminalSnapshot, ttl: Duration) -> Result<(), CacheError> {
        let json = serde_json::to_string(snapshot)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(cache_key(snapshot.submission_id()), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResultCache for RedisResultCache {
    async fn get(&self, id: &SubmissionId) -> Option<TerminalSnapshot> {
        match self.try_get(id).await {
            Ok(hit) => {
                tracing::debug!(submission_id = %id, hit = hit.is_some(), "Result cache lookup");
                hit
            }
            Err(e) => {
                tracing::error!(submission_id = %id, error = %e, "Result cache read failed");
                None
            }
        }
    }

    async fn put(&self, snapshot: TerminalSnapshot, ttl: Duration) {
        if let Err(e) = self.try_put(&snapshot, ttl).await {
            tracing::error!(
                submission_id = %snapshot.submission_id(),
                error = %e,
                "Result cache write failed"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

pub struct MemoryResultCache {
    entries: RwLock<HashMap<SubmissionId, (TerminalSnapshot, Timestamp)>>,
    clock: Arc<dyn Clock>,
}

impl MemoryResultCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    /// Read-only: expired entries are left for the next `put` to prune.
    async fn get(&self, id: &SubmissionId) -> Option<TerminalSnapshot> {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .get(id)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(snapshot, _)| snapshot.clone())
    }

    async fn put(&self, snapshot: TerminalSnapshot, ttl: Duration) {
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(snapshot.submission_id().clone(), (snapshot, expires_at));
    }
}

#[cfg(test)]
mod tests {
    use codearena_core::{
        DisplayStatus, ExecutionMetrics, FakeClock, StatusEvent, SubmissionSnapshot,
        SubmissionStatus,
    };

    use super::*;

    fn accepted(id: &str) -> TerminalSnapshot {
        let event = StatusEvent::finished(
            SubmissionId::new(id),
            SubmissionStatus::Accepted,
            ExecutionMetrics {
                execution_time_ms: 5,
                memory_used_kb: 100,
            },
            vec![],
        );
        TerminalSnapshot::try_from(SubmissionSnapshot::from_event(&event)).unwrap()
    }

    #[tokio::test]
    async fn miss_on_unset_key() {
        let cache = MemoryResultCache::new(Arc::new(FakeClock::new()));
        assert!(cache.get(&SubmissionId::new("nope")).await.is_none());
    }

    #[tokio::test]
    async fn hit_until_ttl_elapses() {
        let clock = FakeClock::new();
        let cache = MemoryResultCache::new(Arc::new(clock.clone()));
        let id = SubmissionId::new("s-1");
        cache.put(accepted("s-1"), DEFAULT_RESULT_TTL).await;

        clock.advance(Duration::from_secs(59 * 60));
        let hit = cache.get(&id).await.unwrap();
        assert_eq!(hit.snapshot().status, DisplayStatus::Accepted);

        clock.advance(Duration::from_secs(60));
        assert!(cache.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn put_prunes_expired_entries() {
        let clock = FakeClock::new();
        let cache = MemoryResultCache::new(Arc::new(clock.clone()));
        for i in 0..1000 {
            cache.put(accepted(&format!("old-{i}")), Duration::from_secs(60)).await;
        }

        clock.advance(Duration::from_secs(24 * 60 * 60));
        cache.put(accepted("fresh"), Duration::from_secs(60)).await;

        assert_eq!(cache.entries.read().await.len(), 1);
        assert!(cache.get(&SubmissionId::new("fresh")).await.is_some());
    }

    #[tokio::test]
    async fn expired_read_does_not_touch_a_newer_write() {
        let clock = FakeClock::new();
        let cache = MemoryResultCache::new(Arc::new(clock.clone()));
        let id = SubmissionId::new("s-1");
        cache.put(accepted("s-1"), Duration::from_secs(60)).await;
        clock.advance(Duration::from_secs(61));

        assert!(cache.get(&id).await.is_none());
        assert_eq!(cache.entries.read().await.len(), 1);

        cache.put(accepted("s-1"), Duration::from_secs(60)).await;
        assert!(cache.get(&id).await.is_some());
    }

    #[test]
    fn key_is_namespaced_by_submission() {
        assert_eq!(cache_key(&SubmissionId::new("abc")), "submission:abc");
    }
}
