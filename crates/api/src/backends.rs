//! Selection and wiring of storage backends.
//!
//! With `REDIS_URL` set, the queue, rate-limit counters, result cache and
//! status channel all live in Redis; otherwise they are in-process, which
//! only makes sense for a single gateway instance. `DATABASE_URL` selects
//! the Postgres store over the in-memory one the same way.

use std::sync::Arc;

use codearena_cache::{
    CounterStore, MemoryCounterStore, MemoryResultCache, RedisCounterStore, RedisResultCache,
    ResultCache,
};
use codearena_core::Clock;
use codearena_db::{DbPool, MemorySubmissionStore, PgSubmissionStore, SubmissionStore};
use codearena_events::{BroadcastTopic, ChannelError, LocalBroadcast, RedisBroadcast};
use codearena_queue::{JobQueue, MemoryQueue, RedisQueue};
use redis::aio::ConnectionManager;

use crate::config::ServerConfig;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("Redis connection failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Status channel setup failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Every collaborator the gateway talks to, behind its trait.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn SubmissionStore>,
    pub queue: Arc<dyn JobQueue>,
    pub counters: Arc<dyn CounterStore>,
    pub cache: Arc<dyn ResultCache>,
    pub topic: Arc<dyn BroadcastTopic>,
    /// Present only with the Postgres store; used by the health probe.
    pub pool: Option<DbPool>,
}

impl Backends {
    /// Connect whatever `config` points at, falling back to in-process
    /// backends for anything left unset.
    pub async fn connect(
        config: &ServerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BootstrapError> {
        let (store, pool): (Arc<dyn SubmissionStore>, Option<DbPool>) =
            match &config.database_url {
                Some(url) => {
                    let pool = codearena_db::create_pool(url).await?;
                    tracing::info!("Connected to Postgres");
                    (Arc::new(PgSubmissionStore::new(pool.clone())), Some(pool))
                }
                None => {
                    tracing::warn!("DATABASE_URL not set, using in-memory submission store");
                    (Arc::new(MemorySubmissionStore::new()), None)
                }
            };

        let mut backends = match &config.redis_url {
            Some(url) => {
                let client = redis::Client::open(url.as_str())?;
                let conn = ConnectionManager::new(client).await?;
                tracing::info!("Connected to Redis");

                let queue = RedisQueue::new(conn.clone(), &config.queue_name, Arc::clone(&clock));
                Self {
                    store,
                    queue: Arc::new(queue),
                    counters: Arc::new(RedisCounterStore::new(conn.clone())),
                    cache: Arc::new(RedisResultCache::new(conn)),
                    topic: Arc::new(RedisBroadcast::connect(url).await?),
                    pool: None,
                }
            }
            None => {
                tracing::warn!("REDIS_URL not set, using in-process queue, cache and channel");
                Self::in_memory_with_store(clock, store)
            }
        };
        backends.pool = pool;
        Ok(backends)
    }

    /// Fully in-process backends with an empty store.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::in_memory_with_store(clock, Arc::new(MemorySubmissionStore::new()))
    }

    /// In-process queue, counters, cache and channel around `store`.
    pub fn in_memory_with_store(clock: Arc<dyn Clock>, store: Arc<dyn SubmissionStore>) -> Self {
        Self {
            store,
            queue: Arc::new(MemoryQueue::new(Arc::clone(&clock))),
            counters: Arc::new(MemoryCounterStore::new(Arc::clone(&clock))),
            cache: Arc::new(MemoryResultCache::new(clock)),
            topic: Arc::new(LocalBroadcast::default()),
            pool: None,
        }
    }
}
