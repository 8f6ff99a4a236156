//! Typed status-event channel.

use std::sync::Arc;

use codearena_core::StatusEvent;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::topic::{BroadcastTopic, ChannelError};

/// Topic name shared by workers and API processes.
pub const DEFAULT_STATUS_TOPIC: &str = "submission:updates";

/// JSON-encoded [`StatusEvent`]s on a single topic.
#[derive(Clone)]
pub struct StatusChannel {
    topic: Arc<dyn BroadcastTopic>,
    name: String,
}

impl StatusChannel {
    pub fn new(topic: Arc<dyn BroadcastTopic>, name: impl Into<String>) -> Self {
        Self {
            topic,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn publish(&self, event: &StatusEvent) -> Result<(), ChannelError> {
        let payload = serde_json::to_string(event)?;
        self.topic.publish(&self.name, payload).await
    }

    /// Decoded events from now on. Undecodable payloads are logged and skipped.
    pub async fn subscribe(&self) -> Result<BoxStream<'static, StatusEvent>, ChannelError> {
        let raw = self.topic.subscribe(&self.name).await?;
        let stream = raw.filter_map(|payload| async move {
            match serde_json::from_str::<StatusEvent>(&payload) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::error!(error = %e, "Discarding malformed status event");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
