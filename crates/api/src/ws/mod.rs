//! WebSocket infrastructure for live submission updates.
//!
//! Provides connection management, the subscription registry, the wire
//! messages, heartbeat monitoring, and the HTTP upgrade handler.

mod handler;
mod heartbeat;
pub mod manager;
pub mod messages;
pub mod registry;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
pub use messages::{ClientMessage, ServerMessage};
pub use registry::{RegistryStats, SubscriptionRegistry};
