use std::time::Duration;

use codearena_cache::RateLimitConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. In
/// production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Shared key-value store. `None` selects in-process backends.
    pub redis_url: Option<String>,
    /// Relational store. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub rate_limit: RateLimitConfig,
    /// TTL of cached terminal results (default: one hour).
    pub result_cache_ttl: Duration,
    /// Broadcast topic carrying status events.
    pub status_channel: String,
    /// Key prefix of the job queue.
    pub queue_name: String,
    /// Interval of the queue retention sweeper.
    pub retention_sweep_interval: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                 |
    /// |---------------------------|-------------------------|
    /// | `HOST`                    | `0.0.0.0`               |
    /// | `PORT`                    | `3000`                  |
    /// | `CORS_ORIGINS`            | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                    |
    /// | `REDIS_URL`               | unset                   |
    /// | `DATABASE_URL`            | unset                   |
    /// | `RATE_LIMIT_WINDOW_MS`    | `60000`                 |
    /// | `RATE_LIMIT_MAX_REQUESTS` | `5`                     |
    /// | `RESULT_CACHE_TTL_SECS`   | `3600`                  |
    /// | `STATUS_CHANNEL`          | `submission:updates`    |
    /// | `QUEUE_NAME`              | `execution-queue`       |
    /// | `RETENTION_SWEEP_SECS`    | `60`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = env_parse("REQUEST_TIMEOUT_SECS", 30u64);

        let rate_limit = RateLimitConfig {
            window: Duration::from_millis(env_parse("RATE_LIMIT_WINDOW_MS", 60_000u64)),
            max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", 5u32),
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            redis_url: env_opt("REDIS_URL"),
            database_url: env_opt("DATABASE_URL"),
            rate_limit,
            result_cache_ttl: Duration::from_secs(env_parse("RESULT_CACHE_TTL_SECS", 3600u64)),
            status_channel: std::env::var("STATUS_CHANNEL")
                .unwrap_or_else(|_| codearena_events::DEFAULT_STATUS_TOPIC.into()),
            queue_name: std::env::var("QUEUE_NAME")
                .unwrap_or_else(|_| codearena_queue::redis_queue::DEFAULT_QUEUE_NAME.into()),
            retention_sweep_interval: Duration::from_secs(env_parse("RETENTION_SWEEP_SECS", 60u64)),
        }
    }
}

impl Default for ServerConfig {
    /// Development defaults with in-process backends.
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            cors_origins: vec!["http://localhost:5173".into()],
            request_timeout_secs: 30,
            redis_url: None,
            database_url: None,
            rate_limit: RateLimitConfig::default(),
            result_cache_ttl: codearena_cache::DEFAULT_RESULT_TTL,
            status_channel: codearena_events::DEFAULT_STATUS_TOPIC.into(),
            queue_name: codearena_queue::redis_queue::DEFAULT_QUEUE_NAME.into(),
            retention_sweep_interval: codearena_queue::retention::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an env var, panicking on malformed values so misconfiguration
/// fails fast at startup.
fn env_parse<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid number: {e}")),
        Err(_) => default,
    }
}
