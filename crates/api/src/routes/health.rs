use axum::extract::State;
use axum::{routing::get, Json, Router};
use codearena_queue::QueueStats;
use serde::Serialize;

use crate::state::AppState;
use crate::ws::RegistryStats;

/// Health check response payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the database is reachable; absent with the in-memory store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_healthy: Option<bool>,
    /// Whether the queue backend answered.
    pub queue_healthy: bool,
    /// Live WebSocket connections.
    pub connections: usize,
    pub subscriptions: RegistryStats,
    pub queue: QueueStats,
}

/// GET /health -- service, store and queue health plus fan-out statistics.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = match &state.pool {
        Some(pool) => Some(codearena_db::health_check(pool).await.is_ok()),
        None => None,
    };

    let (queue_healthy, queue) = match state.queue.stats().await {
        Ok(stats) => (true, stats),
        Err(e) => {
            tracing::error!(error = %e, "Queue statistics unavailable");
            (false, QueueStats::default())
        }
    };

    let healthy = queue_healthy && db_healthy.unwrap_or(true);

    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        queue_healthy,
        connections: state.ws_manager.connection_count().await,
        subscriptions: state.ws_manager.stats().await,
        queue,
    })
}

/// Mount health check routes (root level, not under `/api`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
