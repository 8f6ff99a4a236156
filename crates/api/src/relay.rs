//! Status relay: the gateway's single subscriber on the status channel.
//!
//! Every event received is fanned out to the WebSocket connections
//! watching its submission. Terminal events are also written to the
//! result cache; that write runs on its own task so a slow cache never
//! holds up delivery of the next event.

use std::sync::Arc;
use std::time::Duration;

use codearena_cache::ResultCache;
use codearena_core::{StatusEvent, SubmissionSnapshot, TerminalSnapshot};
use codearena_events::{ChannelError, StatusChannel};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ws::{ServerMessage, WsManager};

#[derive(Clone)]
pub struct StatusRelay {
    channel: StatusChannel,
    ws_manager: Arc<WsManager>,
    cache: Arc<dyn ResultCache>,
    cache_ttl: Duration,
}

impl StatusRelay {
    pub fn new(
        channel: StatusChannel,
        ws_manager: Arc<WsManager>,
        cache: Arc<dyn ResultCache>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            channel,
            ws_manager,
            cache,
            cache_ttl,
        }
    }

    /// Push `event` to its subscribers.
    ///
    /// Returns how many connections received it, plus the snapshot to
    /// cache when the event is terminal.
    pub async fn deliver(&self, event: &StatusEvent) -> (usize, Option<TerminalSnapshot>) {
        let frame = ServerMessage::from_event(event).to_message();
        let delivered = self.ws_manager.publish(&event.submission_id, frame).await;

        tracing::debug!(
            submission_id = %event.submission_id,
            status = %event.status,
            delivered,
            "Relayed status event"
        );

        let terminal = TerminalSnapshot::try_from(SubmissionSnapshot::from_event(event)).ok();
        (delivered, terminal)
    }

    /// Deliver one event and wait for its cache write.
    pub async fn handle(&self, event: StatusEvent) -> usize {
        let (delivered, terminal) = self.deliver(&event).await;
        if let Some(snapshot) = terminal {
            self.cache.put(snapshot, self.cache_ttl).await;
        }
        delivered
    }

    /// Subscribe to the status channel and relay until `cancel` fires.
    ///
    /// The first subscription is established before this returns, so
    /// events published afterwards are not missed. If the channel later
    /// closes (broker connection lost), the relay resubscribes with a
    /// growing delay capped at [`RESUBSCRIBE_MAX_DELAY`]. Events published
    /// while disconnected are lost.
    pub async fn start(self, cancel: CancellationToken) -> Result<JoinHandle<()>, ChannelError> {
        let mut events = self.channel.subscribe().await?;
        tracing::info!(topic = self.channel.name(), "Status relay subscribed");

        Ok(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = events.next() => match next {
                        Some(event) => event,
                        None => {
                            tracing::warn!("Status channel closed, resubscribing");
                            match self.resubscribe(&cancel).await {
                                Some(stream) => {
                                    events = stream;
                                    continue;
                                }
                                None => break,
                            }
                        }
                    },
                };

                let (_, terminal) = self.deliver(&event).await;
                if let Some(snapshot) = terminal {
                    let cache = Arc::clone(&self.cache);
                    let ttl = self.cache_ttl;
                    tokio::spawn(async move { cache.put(snapshot, ttl).await });
                }
            }
            tracing::info!("Status relay stopped");
        }))
    }

    /// Retry the subscription until it succeeds. `None` once cancelled.
    async fn resubscribe(&self, cancel: &CancellationToken) -> Option<BoxStream<'static, StatusEvent>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(resubscribe_delay(attempt)) => {}
            }
            match self.channel.subscribe().await {
                Ok(stream) => {
                    tracing::info!(topic = self.channel.name(), attempt, "Status relay resubscribed");
                    return Some(stream);
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "Status relay resubscribe failed");
                }
            }
        }
    }
}

/// Upper bound on the wait between resubscribe attempts.
pub const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(2);

/// Wait before resubscribe attempt `attempt` (1-based): 200ms per attempt,
/// capped at [`RESUBSCRIBE_MAX_DELAY`].
pub fn resubscribe_delay(attempt: u32) -> Duration {
    Duration::from_millis(200)
        .saturating_mul(attempt)
        .min(RESUBSCRIBE_MAX_DELAY)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::extract::ws::Message;
    use codearena_cache::MemoryResultCache;
    use codearena_core::{Clock, DisplayStatus, FakeClock, SubmissionStatus};
    use codearena_events::{BroadcastTopic, LocalBroadcast, MessageStream};

    use super::*;

    /// The first subscription ends immediately, like a dropped broker
    /// connection; later ones are live.
    #[derive(Default)]
    struct DroppingTopic {
        inner: LocalBroadcast,
        dropped: AtomicBool,
        live: AtomicUsize,
    }

    #[async_trait]
    impl BroadcastTopic for DroppingTopic {
        async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
            self.inner.publish(topic, payload).await
        }

        async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError> {
            if !self.dropped.swap(true, Ordering::SeqCst) {
                return Ok(futures::stream::empty::<String>().boxed());
            }
            let stream = self.inner.subscribe(topic).await?;
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(stream)
        }
    }

    fn relay() -> (StatusRelay, Arc<WsManager>, Arc<MemoryResultCache>) {
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let cache = Arc::new(MemoryResultCache::new(clock));
        let manager = Arc::new(WsManager::new());
        let channel = StatusChannel::new(Arc::new(LocalBroadcast::default()), "updates");
        let relay = StatusRelay::new(
            channel,
            Arc::clone(&manager),
            cache.clone(),
            Duration::from_secs(60),
        );
        (relay, manager, cache)
    }

    fn text(msg: Message) -> serde_json::Value {
        match msg {
            Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn intermediate_events_are_delivered_but_not_cached() {
        let (relay, manager, cache) = relay();
        let mut rx = manager.add("c1".into()).await;
        manager.subscribe("c1", &"s-1".into()).await;

        let delivered = relay.handle(StatusEvent::running("s-1".into())).await;
        assert_eq!(delivered, 1);
        assert_eq!(text(rx.recv().await.unwrap())["type"], "submission_status");
        assert!(cache.get(&"s-1".into()).await.is_none());
    }

    #[tokio::test]
    async fn terminal_events_are_cached_even_without_subscribers() {
        let (relay, _manager, cache) = relay();

        let event = StatusEvent::failed("s-2".into(), SubmissionStatus::CompilationError, "boom");
        assert_eq!(relay.handle(event).await, 0);

        let cached = cache.get(&"s-2".into()).await.unwrap();
        assert_eq!(cached.snapshot().error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn events_for_other_submissions_are_not_delivered() {
        let (relay, manager, _cache) = relay();
        let mut rx = manager.add("c1".into()).await;
        manager.subscribe("c1", &"s-a".into()).await;

        assert_eq!(relay.handle(StatusEvent::queued("s-b".into())).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_status_reaches_subscribers_as_queued() {
        let (relay, manager, cache) = relay();
        let mut rx = manager.add("c1".into()).await;
        manager.subscribe("c1", &"s-1".into()).await;

        let event: StatusEvent = serde_json::from_str(
            r#"{"submissionId":"s-1","status":"memory_exceeded","timestamp":"2024-05-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(relay.handle(event).await, 1);

        let frame = text(rx.recv().await.unwrap());
        assert_eq!(frame["type"], "submission_status");
        assert_eq!(frame["data"]["status"], DisplayStatus::Queued.label());
        assert!(cache.get(&"s-1".into()).await.is_none());
    }

    #[test]
    fn resubscribe_delay_grows_then_caps() {
        assert_eq!(resubscribe_delay(1), Duration::from_millis(200));
        assert_eq!(resubscribe_delay(3), Duration::from_millis(600));
        assert_eq!(resubscribe_delay(10), RESUBSCRIBE_MAX_DELAY);
        assert_eq!(resubscribe_delay(u32::MAX), RESUBSCRIBE_MAX_DELAY);
    }

    #[tokio::test]
    async fn relay_resubscribes_after_channel_closes() {
        let topic = Arc::new(DroppingTopic::default());
        let channel = StatusChannel::new(topic.clone(), "updates");
        let manager = Arc::new(WsManager::new());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let relay = StatusRelay::new(
            channel.clone(),
            Arc::clone(&manager),
            Arc::new(MemoryResultCache::new(clock)),
            Duration::from_secs(60),
        );
        let mut rx = manager.add("c1".into()).await;
        manager.subscribe("c1", &"s-1".into()).await;

        let cancel = CancellationToken::new();
        let handle = relay.start(cancel.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while topic.live.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("relay never resubscribed");

        channel.publish(&StatusEvent::running("s-1".into())).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text(frame)["data"]["status"], "Running");

        cancel.cancel();
        handle.await.unwrap();
    }
}
