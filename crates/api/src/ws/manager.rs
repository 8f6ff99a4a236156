use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use codearena_core::{ConnectionId, SubmissionId, Timestamp};
use tokio::sync::{mpsc, RwLock};

use crate::ws::registry::{RegistryStats, SubscriptionRegistry};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    pub connected_at: Timestamp,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, WsConnection>,
    registry: SubscriptionRegistry,
}

/// Manages all active WebSocket connections and what each one watches.
///
/// Connections and subscriptions sit behind one lock so a disconnect can
/// never leave subscriptions pointing at a dead sender.
pub struct WsManager {
    inner: RwLock<Inner>,
}

impl WsManager {
    /// Create a new, empty connection manager.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(&self, conn_id: ConnectionId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        self.inner.write().await.connections.insert(conn_id, conn);
        rx
    }

    /// Remove a connection and every subscription it held.
    ///
    /// Safe to call more than once for the same id.
    pub async fn remove(&self, conn_id: &str) -> Vec<SubmissionId> {
        let mut inner = self.inner.write().await;
        inner.connections.remove(conn_id);
        inner.registry.disconnect(conn_id)
    }

    /// Subscribe a live connection to a submission.
    ///
    /// Returns `false` when the connection is unknown (already gone).
    pub async fn subscribe(&self, conn_id: &str, submission_id: &SubmissionId) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(conn_id) {
            return false;
        }
        inner.registry.subscribe(conn_id, submission_id);
        true
    }

    /// Returns whether the pair existed.
    pub async fn unsubscribe(&self, conn_id: &str, submission_id: &SubmissionId) -> bool {
        self.inner
            .write()
            .await
            .registry
            .unsubscribe(conn_id, submission_id)
    }

    /// Send a message to every connection subscribed to `submission_id`.
    ///
    /// Connections whose send channels are closed are skipped; their
    /// receive loop removes them. Returns the number of connections the
    /// message was handed to.
    pub async fn publish(&self, submission_id: &SubmissionId, message: Message) -> usize {
        let inner = self.inner.read().await;
        let mut count = 0;
        for conn_id in inner.registry.subscribers(submission_id) {
            if let Some(conn) = inner.connections.get(conn_id) {
                if conn.sender.send(message.clone()).is_ok() {
                    count += 1;
                }
            }
        }
        count
    }

    /// Send a message to one connection. Returns `false` if it is gone.
    pub async fn send_to(&self, conn_id: &str, message: Message) -> bool {
        self.inner
            .read()
            .await
            .connections
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    pub async fn subscriptions_of(&self, conn_id: &str) -> Vec<SubmissionId> {
        self.inner.read().await.registry.subscriptions_of(conn_id)
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn stats(&self) -> RegistryStats {
        self.inner.read().await.registry.stats()
    }

    /// Send a Close frame to every connection, then clear connections and
    /// subscriptions.
    pub async fn shutdown_all(&self) {
        let mut inner = self.inner.write().await;
        let count = inner.connections.len();
        for conn in inner.connections.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        inner.connections.clear();
        inner.registry.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let inner = self.inner.read().await;
        for conn in inner.connections.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}
