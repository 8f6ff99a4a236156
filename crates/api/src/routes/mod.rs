pub mod health;
pub mod submissions;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api` route tree.
///
/// ```text
/// /submissions                 submit (POST)
/// /submissions/{id}            point-in-time status (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/submissions", submissions::router())
}

/// Live updates, mounted at the root: `/ws`.
pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws::ws_handler))
}
