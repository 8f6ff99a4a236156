use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};

use crate::state::AppState;
use crate::ws::manager::WsManager;
use crate::ws::messages::{ClientMessage, ServerMessage};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with `WsManager` and
/// managed by a spawned sender task plus the receive loop.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.ws_manager))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink (outbound) and stream (inbound), then:
///   1. Registers the connection with `WsManager`.
///   2. Spawns a sender task that forwards messages from the manager channel.
///   3. Dispatches inbound frames on the current task.
///   4. Drops the connection and all its subscriptions on disconnect.
async fn handle_socket(socket: WebSocket, ws_manager: Arc<WsManager>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = ws_manager.add(conn_id.clone()).await;

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                tracing::debug!(conn_id = %sender_conn_id, "WebSocket sink closed");
                break;
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let reply = dispatch(&ws_manager, &conn_id, text.as_str()).await;
                ws_manager.send_to(&conn_id, reply.to_message()).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    let dropped = ws_manager.remove(&conn_id).await;
    send_task.abort();
    tracing::info!(
        conn_id = %conn_id,
        subscriptions = dropped.len(),
        "WebSocket disconnected"
    );
}

/// Apply one client frame and produce the acknowledgement.
pub(crate) async fn dispatch(ws_manager: &WsManager, conn_id: &str, text: &str) -> ServerMessage {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(reason) => {
            tracing::debug!(conn_id = %conn_id, %reason, "Rejected client frame");
            return ServerMessage::error(reason);
        }
    };

    match message {
        ClientMessage::SubscribeSubmission(r) => {
            if !ws_manager.subscribe(conn_id, &r.submission_id).await {
                return ServerMessage::error("Connection is closing");
            }
            tracing::info!(conn_id = %conn_id, submission_id = %r.submission_id, "Subscribed");
            ServerMessage::subscribed(r.submission_id)
        }
        ClientMessage::UnsubscribeSubmission(r) => {
            ws_manager.unsubscribe(conn_id, &r.submission_id).await;
            tracing::debug!(conn_id = %conn_id, submission_id = %r.submission_id, "Unsubscribed");
            ServerMessage::unsubscribed(r.submission_id)
        }
        ClientMessage::Ping => ServerMessage::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_then_unsubscribe_round() {
        let manager = WsManager::new();
        let _rx = manager.add("c1".into()).await;

        let reply = dispatch(
            &manager,
            "c1",
            r#"{"type":"subscribe_submission","data":{"submissionId":"s-1"}}"#,
        )
        .await;
        assert_eq!(reply, ServerMessage::subscribed("s-1".into()));
        assert_eq!(manager.stats().await.total_submissions, 1);

        let reply = dispatch(
            &manager,
            "c1",
            r#"{"type":"unsubscribe_submission","data":{"submissionId":"s-1"}}"#,
        )
        .await;
        assert_eq!(reply, ServerMessage::unsubscribed("s-1".into()));
        assert_eq!(manager.stats().await.total_submissions, 0);
    }

    #[tokio::test]
    async fn malformed_frame_gets_error_and_changes_nothing() {
        let manager = WsManager::new();
        let _rx = manager.add("c1".into()).await;

        let reply = dispatch(
            &manager,
            "c1",
            r#"{"type":"subscribe_submission","data":{"submissionId":""}}"#,
        )
        .await;
        assert_eq!(reply, ServerMessage::error("Invalid submissionId"));
        assert_eq!(manager.stats().await.total_connections, 0);
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let manager = WsManager::new();
        let reply = dispatch(&manager, "c1", r#"{"type":"ping"}"#).await;
        assert_eq!(reply, ServerMessage::Pong);
    }

    #[tokio::test]
    async fn subscribe_after_removal_is_refused() {
        let manager = WsManager::new();
        let _rx = manager.add("c1".into()).await;
        manager.remove("c1").await;

        let reply = dispatch(
            &manager,
            "c1",
            r#"{"type":"subscribe_submission","data":{"submissionId":"s-1"}}"#,
        )
        .await;
        assert!(matches!(reply, ServerMessage::Error(_)));
        assert_eq!(manager.stats().await.total_submissions, 0);
    }
}
