#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use codearena_api::backends::Backends;
use codearena_api::config::ServerConfig;
use codearena_api::intake::SubmissionIntake;
use codearena_api::reader::StatusReader;
use codearena_api::relay::StatusRelay;
use codearena_api::router::build_app_router;
use codearena_api::state::AppState;
use codearena_api::ws::WsManager;
use codearena_cache::{RateLimitConfig, RateLimiter, ResultCache};
use codearena_core::{Clock, FakeClock, TestCaseRef};
use codearena_db::MemorySubmissionStore;
use codearena_events::StatusChannel;
use codearena_core::{SubmissionId, SubmissionJob};
use codearena_queue::{
    ClaimedJob, EnqueueReceipt, FailOutcome, JobQueue, JobRecord, QueueError, QueueStats,
    StalledJob,
};
use http_body_util::BodyExt;
use tower::ServiceExt;

/// Build a test `ServerConfig` with safe defaults and in-process backends.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        redis_url: None,
        database_url: None,
        rate_limit: RateLimitConfig {
            window: Duration::from_secs(60),
            max_requests: 5,
        },
        result_cache_ttl: Duration::from_secs(3600),
        status_channel: "submission:updates".to_string(),
        queue_name: "execution-queue".to_string(),
        retention_sweep_interval: Duration::from_secs(60),
    }
}

/// Problem seeded into every test store, with three ordered test cases.
pub const PROBLEM_ID: &str = "two-sum";

/// The whole gateway wired against in-process backends and a fake clock.
pub struct TestApp {
    pub router: Router,
    pub clock: FakeClock,
    pub store: Arc<MemorySubmissionStore>,
    pub queue: Arc<dyn JobQueue>,
    pub cache: Arc<dyn ResultCache>,
    pub channel: StatusChannel,
    pub ws_manager: Arc<WsManager>,
    pub relay: StatusRelay,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Same wiring, with `queue` in place of the in-memory queue.
    pub async fn with_queue(queue: Arc<dyn JobQueue>) -> Self {
        Self::build(Some(queue)).await
    }

    async fn build(queue: Option<Arc<dyn JobQueue>>) -> Self {
        let config = test_config();
        let clock = FakeClock::new();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let store = Arc::new(MemorySubmissionStore::new());
        store
            .add_problem(
                PROBLEM_ID,
                (1..=3)
                    .map(|i| TestCaseRef {
                        id: format!("tc-{i}"),
                        input: format!("{i} {i}"),
                        expected_output: format!("{}", i * 2),
                    })
                    .collect(),
            )
            .await;

        let mut backends = Backends::in_memory_with_store(Arc::clone(&shared_clock), store.clone());
        if let Some(queue) = queue {
            backends.queue = queue;
        }
        let channel = StatusChannel::new(Arc::clone(&backends.topic), config.status_channel.clone());
        let ws_manager = Arc::new(WsManager::new());

        let relay = StatusRelay::new(
            channel.clone(),
            Arc::clone(&ws_manager),
            Arc::clone(&backends.cache),
            config.result_cache_ttl,
        );

        let limiter = Arc::new(RateLimiter::new(
            Arc::clone(&backends.counters),
            config.rate_limit,
            Arc::clone(&shared_clock),
        ));
        let intake = SubmissionIntake::new(
            limiter,
            Arc::clone(&backends.store),
            Arc::clone(&backends.queue),
            channel.clone(),
            shared_clock,
        );
        let reader = StatusReader::new(
            Arc::clone(&backends.store),
            Arc::clone(&backends.cache),
            config.result_cache_ttl,
        );

        let state = AppState {
            config: Arc::new(config.clone()),
            ws_manager: Arc::clone(&ws_manager),
            intake: Arc::new(intake),
            reader: Arc::new(reader),
            queue: Arc::clone(&backends.queue),
            pool: None,
        };

        Self {
            router: build_app_router(state, &config),
            clock,
            store,
            queue: backends.queue,
            cache: backends.cache,
            channel,
            ws_manager,
            relay,
        }
    }
}

/// A queue whose broker is unreachable: every call fails.
pub struct UnreachableQueue;

fn unreachable() -> QueueError {
    QueueError::Backend(redis::RedisError::from(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "queue broker unreachable",
    )))
}

#[async_trait::async_trait]
impl JobQueue for UnreachableQueue {
    async fn enqueue(&self, _job: SubmissionJob) -> Result<EnqueueReceipt, QueueError> {
        Err(unreachable())
    }
    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        Err(unreachable())
    }
    async fn complete(&self, _id: &SubmissionId) -> Result<(), QueueError> {
        Err(unreachable())
    }
    async fn fail(&self, _id: &SubmissionId, _error: &str) -> Result<FailOutcome, QueueError> {
        Err(unreachable())
    }
    async fn recover_stalled(&self) -> Result<Vec<StalledJob>, QueueError> {
        Err(unreachable())
    }
    async fn purge_expired(&self) -> Result<u64, QueueError> {
        Err(unreachable())
    }
    async fn stats(&self) -> Result<QueueStats, QueueError> {
        Err(unreachable())
    }
    async fn get(&self, _id: &SubmissionId) -> Result<Option<JobRecord>, QueueError> {
        Err(unreachable())
    }
}

/// Send a GET request through the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

/// Send a JSON POST request, with optional extra headers.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    app.oneshot(request).await.unwrap()
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
