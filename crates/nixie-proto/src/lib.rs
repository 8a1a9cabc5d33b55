//! Nixie Protocol
//!
//! JSON text-frame messages exchanged between workers, observers, and the
//! coordinator server, plus the validation applied to every inbound command
//! before it reaches the coordinator.

mod command;
mod validate;

pub use command::{
    CommandType, GroupSecret, ServerCommand, ServerJoinCommand, ServerWatchRequest,
};
pub use validate::{
    validate_join_command, validate_notify_command, validate_watch_request, ValidationError,
    ValidationResult,
};
