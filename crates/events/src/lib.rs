//! Status-event fan-out between workers and API processes.
//!
//! - [`BroadcastTopic`]: raw string publish/subscribe over named topics,
//!   implemented in process by [`LocalBroadcast`] and across processes by
//!   [`RedisBroadcast`].
//! - [`StatusChannel`]: typed JSON layer carrying [`StatusEvent`]s on one
//!   well-known topic.
//!
//! [`StatusEvent`]: codearena_core::StatusEvent

pub mod channel;
pub mod local;
pub mod pubsub;
pub mod topic;

pub use channel::{StatusChannel, DEFAULT_STATUS_TOPIC};
pub use local::LocalBroadcast;
pub use pubsub::RedisBroadcast;
pub use topic::{BroadcastTopic, ChannelError, MessageStream};
