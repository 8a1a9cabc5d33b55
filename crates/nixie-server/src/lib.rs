//! Nixie Server
//!
//! The websocket engagement layer over the coordinator: a writable endpoint
//! accepting join and notify commands, and a read-only endpoint streaming
//! group snapshots to observers. Each connection runs a handshake followed
//! by two pumps (inbound notifications, outbound version-delta updates)
//! sharing one cancellation lifetime.

mod config;
mod handler;
mod session;

pub use config::ServerConfig;
pub use handler::CoordinatorHandler;
