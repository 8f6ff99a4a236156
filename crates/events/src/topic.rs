use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of raw payloads received on a topic.
pub type MessageStream = BoxStream<'static, String>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Broker error: {0}")]
    Broker(#[from] ::redis::RedisError),

    #[error("Payload encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Best-effort topic broadcast.
///
/// Every subscriber active when a message is published receives it at most
/// once. Subscribers that join later do not see earlier messages.
#[async_trait]
pub trait BroadcastTopic: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError>;

    /// Start listening on `topic`. The subscription is live once this returns.
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError>;
}
