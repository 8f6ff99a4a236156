//! Tests for `WsManager`.
//!
//! These exercise the connection manager directly, without performing any
//! HTTP upgrades: add/remove semantics, subscription scoping, disconnect
//! cleanup, and graceful shutdown.

use axum::extract::ws::Message;
use codearena_api::ws::{RegistryStats, WsManager};
use codearena_core::SubmissionId;

fn sid(id: &str) -> SubmissionId {
    SubmissionId::new(id)
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_manager_has_zero_connections() {
    let manager = WsManager::new();

    assert_eq!(manager.connection_count().await, 0);
    assert_eq!(manager.stats().await, RegistryStats::default());
}

#[tokio::test]
async fn add_and_remove_track_connection_count() {
    let manager = WsManager::new();

    let _rx1 = manager.add("conn-1".to_string()).await;
    let _rx2 = manager.add("conn-2".to_string()).await;
    assert_eq!(manager.connection_count().await, 2);

    manager.remove("conn-1").await;
    assert_eq!(manager.connection_count().await, 1);

    manager.remove("nonexistent").await;
    assert_eq!(manager.connection_count().await, 1);
}

#[tokio::test]
async fn shutdown_all_sends_close_and_clears() {
    let manager = WsManager::new();

    let mut rx1 = manager.add("conn-1".to_string()).await;
    let mut rx2 = manager.add("conn-2".to_string()).await;
    manager.subscribe("conn-1", &sid("s-1")).await;

    manager.shutdown_all().await;

    assert_eq!(manager.connection_count().await, 0);
    assert_eq!(manager.stats().await, RegistryStats::default());

    let msg1 = rx1.recv().await.expect("rx1 should receive Close");
    assert!(
        matches!(msg1, Message::Close(None)),
        "Expected Close(None), got: {msg1:?}"
    );
    let msg2 = rx2.recv().await.expect("rx2 should receive Close");
    assert!(matches!(msg2, Message::Close(None)));

    // The sender was dropped with the connection entry.
    assert!(
        rx1.recv().await.is_none(),
        "Channel should be closed after shutdown"
    );
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_reaches_only_subscribers_of_that_submission() {
    let manager = WsManager::new();

    let mut rx_a = manager.add("conn-a".to_string()).await;
    let mut rx_b = manager.add("conn-b".to_string()).await;
    let mut rx_ab = manager.add("conn-ab".to_string()).await;

    manager.subscribe("conn-a", &sid("A")).await;
    manager.subscribe("conn-b", &sid("B")).await;
    manager.subscribe("conn-ab", &sid("A")).await;
    manager.subscribe("conn-ab", &sid("B")).await;

    let delivered = manager
        .publish(&sid("A"), Message::Text("for A".into()))
        .await;
    assert_eq!(delivered, 2);

    let msg = rx_a.recv().await.unwrap();
    assert!(matches!(&msg, Message::Text(t) if *t == "for A"));
    let msg = rx_ab.recv().await.unwrap();
    assert!(matches!(&msg, Message::Text(t) if *t == "for A"));
    assert!(rx_b.try_recv().is_err(), "B-only subscriber must not see A");
}

#[tokio::test]
async fn subscribe_is_idempotent() {
    let manager = WsManager::new();
    let mut rx = manager.add("conn-1".to_string()).await;

    assert!(manager.subscribe("conn-1", &sid("s-1")).await);
    assert!(manager.subscribe("conn-1", &sid("s-1")).await);

    assert_eq!(manager.publish(&sid("s-1"), Message::Text("once".into())).await, 1);
    assert!(rx.recv().await.is_some());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let manager = WsManager::new();
    let mut rx = manager.add("conn-1".to_string()).await;
    manager.subscribe("conn-1", &sid("s-1")).await;

    assert!(manager.unsubscribe("conn-1", &sid("s-1")).await);
    assert!(!manager.unsubscribe("conn-1", &sid("s-1")).await);

    assert_eq!(manager.publish(&sid("s-1"), Message::Text("late".into())).await, 0);
    assert!(rx.try_recv().is_err());
    assert_eq!(manager.stats().await, RegistryStats::default());
}

#[tokio::test]
async fn remove_drops_every_subscription_once() {
    let manager = WsManager::new();
    let _rx1 = manager.add("conn-1".to_string()).await;
    let _rx2 = manager.add("conn-2".to_string()).await;

    manager.subscribe("conn-1", &sid("s-1")).await;
    manager.subscribe("conn-1", &sid("s-2")).await;
    manager.subscribe("conn-2", &sid("s-1")).await;

    let mut dropped = manager.remove("conn-1").await;
    dropped.sort();
    assert_eq!(dropped, vec![sid("s-1"), sid("s-2")]);
    assert_eq!(
        manager.stats().await,
        RegistryStats {
            total_submissions: 1,
            total_connections: 1,
        }
    );

    // A second disconnect for the same connection is a no-op.
    assert!(manager.remove("conn-1").await.is_empty());
    assert_eq!(manager.subscriptions_of("conn-2").await, vec![sid("s-1")]);
}

#[tokio::test]
async fn removed_connection_cannot_subscribe() {
    let manager = WsManager::new();
    let rx = manager.add("conn-1".to_string()).await;
    manager.remove("conn-1").await;
    drop(rx);

    assert!(!manager.subscribe("conn-1", &sid("s-1")).await);
    assert_eq!(manager.stats().await, RegistryStats::default());
}

#[tokio::test]
async fn publish_skips_closed_channels() {
    let manager = WsManager::new();

    let rx1 = manager.add("conn-1".to_string()).await;
    let mut rx2 = manager.add("conn-2".to_string()).await;
    manager.subscribe("conn-1", &sid("s-1")).await;
    manager.subscribe("conn-2", &sid("s-1")).await;

    drop(rx1);

    let delivered = manager
        .publish(&sid("s-1"), Message::Text("still alive".into()))
        .await;
    assert_eq!(delivered, 1);

    let msg = rx2.recv().await.expect("rx2 should receive message");
    assert!(matches!(&msg, Message::Text(t) if *t == "still alive"));
}
