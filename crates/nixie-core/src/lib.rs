//! Nixie Core
//!
//! Shared foundations for the Nixie partition-assignment coordinator:
//! bounded constants, the time abstraction used for retry sleeps and expiry
//! scheduling, and telemetry bootstrap.

pub mod constants;
pub mod error;
pub mod io;
pub mod telemetry;

pub use error::{Error, Result};
pub use io::{TimeProvider, WallClockTime};
pub use telemetry::{init_telemetry, TelemetryConfig};
