//! Status events travelling from the channel to a subscribed client and
//! into the result cache.

mod common;

use std::time::Duration;

use axum::extract::ws::Message;
use codearena_core::{
    ExecutionMetrics, StatusEvent, SubmissionId, SubmissionStatus, TestResult,
};
use common::TestApp;
use tokio_util::sync::CancellationToken;

fn text(msg: Message) -> serde_json::Value {
    match msg {
        Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

fn accepted(id: &SubmissionId) -> StatusEvent {
    let results = (1..=3)
        .map(|i| TestResult {
            test_case_id: format!("tc-{i}"),
            passed: true,
            output: format!("{}", i * 2),
            execution_time_ms: 4,
            error: None,
        })
        .collect();
    StatusEvent::finished(
        id.clone(),
        SubmissionStatus::Accepted,
        ExecutionMetrics {
            execution_time_ms: 12,
            memory_used_kb: 2048,
        },
        results,
    )
}

#[tokio::test]
async fn subscriber_sees_lifecycle_in_order_and_result_is_cached() {
    let app = TestApp::new().await;
    let cancel = CancellationToken::new();
    let relay = app.relay.clone().start(cancel.clone()).await.unwrap();

    let id = SubmissionId::new("X");
    let mut rx = app.ws_manager.add("conn-1".to_string()).await;
    assert!(app.ws_manager.subscribe("conn-1", &id).await);

    app.channel.publish(&StatusEvent::queued(id.clone())).await.unwrap();
    app.channel.publish(&StatusEvent::running(id.clone())).await.unwrap();
    app.channel.publish(&accepted(&id)).await.unwrap();

    let first = text(rx.recv().await.unwrap());
    assert_eq!(first["type"], "submission_status");
    assert_eq!(first["data"]["status"], "Queued");

    let second = text(rx.recv().await.unwrap());
    assert_eq!(second["type"], "submission_status");
    assert_eq!(second["data"]["status"], "Running");

    let third = text(rx.recv().await.unwrap());
    assert_eq!(third["type"], "submission_completed");
    assert_eq!(third["data"]["submissionId"], "X");
    assert_eq!(third["data"]["status"], "Accepted");
    assert_eq!(third["data"]["passedCount"], 3);
    assert_eq!(third["data"]["totalCount"], 3);
    assert_eq!(third["data"]["testResults"].as_array().unwrap().len(), 3);

    // Exactly three frames.
    assert!(rx.try_recv().is_err());

    // The cache write runs on its own task.
    let mut cached = None;
    for _ in 0..100 {
        cached = app.cache.get(&id).await;
        if cached.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let cached = cached.expect("terminal result should be cached");
    assert_eq!(cached.snapshot().status.label(), "Accepted");
    assert_eq!(cached.snapshot().passed_count, Some(3));

    cancel.cancel();
    relay.await.unwrap();
}

#[tokio::test]
async fn unsubscribed_client_misses_events_but_can_read_status() {
    let app = TestApp::new().await;
    let cancel = CancellationToken::new();
    let relay = app.relay.clone().start(cancel.clone()).await.unwrap();

    let id = SubmissionId::new("Y");
    let mut rx = app.ws_manager.add("conn-1".to_string()).await;
    app.ws_manager.subscribe("conn-1", &SubmissionId::new("other")).await;

    app.channel.publish(&accepted(&id)).await.unwrap();

    // Wait for the relay to process it by polling the cache.
    let mut cached = None;
    for _ in 0..100 {
        cached = app.cache.get(&id).await;
        if cached.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cached.is_some());
    assert!(rx.try_recv().is_err());

    let response = common::get(app.router.clone(), "/api/submissions/Y").await;
    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let json = common::body_json(response).await;
    assert_eq!(json["status"], "Accepted");
    assert_eq!(json["totalCount"], 3);

    cancel.cancel();
    relay.await.unwrap();
}
