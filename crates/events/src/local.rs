//! In-process broadcast backed by one `tokio::sync::broadcast` channel per topic.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::topic::{BroadcastTopic, ChannelError, MessageStream};

/// Default buffer capacity for each topic channel.
const DEFAULT_CAPACITY: usize = 1024;

pub struct LocalBroadcast {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<String>>>,
}

impl LocalBroadcast {
    /// When a topic's buffer is full the oldest messages are dropped and
    /// slow subscribers skip ahead.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: RwLock::new(HashMap::new()),
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        if let Some(sender) = self.topics.read().await.get(topic) {
            return sender.clone();
        }
        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBroadcast {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl BroadcastTopic for LocalBroadcast {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
        // A send error only means nobody is listening.
        let _ = self.sender(topic).await.send(payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError> {
        let receiver = self.sender(topic).await.subscribe();
        let topic = topic.to_string();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let topic = topic.clone();
            async move {
                match item {
                    Ok(payload) => Some(payload),
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        tracing::warn!(topic = %topic, skipped = n, "Topic subscriber lagged");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }
}
