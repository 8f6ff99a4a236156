//! CodeArena gateway library.
//!
//! Exposes the building blocks (config, backends, intake, read path,
//! status relay, WebSocket infrastructure, routes) so integration tests
//! and the binary entrypoint share them.

pub mod backends;
pub mod config;
pub mod error;
pub mod handlers;
pub mod intake;
pub mod reader;
pub mod relay;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
