//! Core error types

use thiserror::Error;

/// Errors raised by the foundations crate
#[derive(Error, Debug)]
pub enum Error {
    /// Telemetry bootstrap failed
    #[error("telemetry error: {message}")]
    Telemetry { message: String },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
