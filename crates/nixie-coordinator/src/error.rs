//! Coordinator error types

use thiserror::Error;

/// Errors returned by coordinator operations
///
/// Joining an existing group with a different partition count is the only
/// operation that can fail; everything else is a no-op when its target is
/// missing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Join referenced an existing group with a different partition count
    #[error(
        "group {group} has partition count {existing}, join requested {requested}"
    )]
    InvalidPartitionCount {
        group: String,
        existing: u32,
        requested: u32,
    },
}

/// Result type for coordinator operations
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;
