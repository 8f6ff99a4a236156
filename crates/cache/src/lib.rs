//! Shared fast key-value concerns: the intake rate limiter and the
//! terminal-result cache. Each has an in-process and a Redis backend.

pub mod rate_limit;
pub mod result_cache;

pub use rate_limit::{
    CounterStore, MemoryCounterStore, RateLimitConfig, RateLimiter, RedisCounterStore,
};
pub use result_cache::{MemoryResultCache, RedisResultCache, ResultCache, DEFAULT_RESULT_TTL};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Key-value backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Cached value encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("A session identifier is required")]
    MissingIdentity,
}
