//! Cross-process broadcast over Redis pub/sub.

use std::fmt;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::topic::{BroadcastTopic, ChannelError, MessageStream};

/// Publishes through a shared [`ConnectionManager`]; each subscription opens
/// its own dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisBroadcast {
    client: redis::Client,
    conn: ConnectionManager,
}

impl fmt::Debug for RedisBroadcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroadcast")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisBroadcast {
    pub async fn connect(redis_url: &str) -> Result<Self, ChannelError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl BroadcastTopic for RedisBroadcast {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(topic, payload).await?;
        tracing::trace!(topic, receivers, "Published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping non-text message");
                        None
                    }
                }
            });
        Ok(stream.boxed())
    }
}
