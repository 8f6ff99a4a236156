use std::sync::Arc;

use codearena_db::DbPool;
use codearena_queue::JobQueue;

use crate::config::ServerConfig;
use crate::intake::SubmissionIntake;
use crate::reader::StatusReader;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything inside is behind an `Arc` or is a pool handle.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// WebSocket connections and their submission subscriptions.
    pub ws_manager: Arc<WsManager>,
    pub intake: Arc<SubmissionIntake>,
    pub reader: Arc<StatusReader>,
    /// Read for queue statistics on `/health`.
    pub queue: Arc<dyn JobQueue>,
    /// Database pool, when the Postgres store is in use.
    pub pool: Option<DbPool>,
}
