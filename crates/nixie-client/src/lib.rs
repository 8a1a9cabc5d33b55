//! Nixie Client
//!
//! Worker-side runtime mirroring the server's session layer: dial the
//! coordinator, join a group, diff successive snapshots into per-partition
//! ownership callbacks, acknowledge handshakes, and reconnect with the last
//! snapshot replayed as previous state after an unexpected drop.

mod client;
mod config;
mod dial;
mod diff;

pub use client::CoordinatorClient;
pub use config::{ClientOptions, NodeListener, PartitionListener};
pub use dial::{DefaultDialer, Dialer, WsConnection};
