//! Nixie Coordinator
//!
//! The per-group assignment state machine and its surroundings: the group
//! data model, the stable partition rebalancer, the expiry timer capability,
//! and the registry that serializes access per group and fans version-stamped
//! snapshots out to long-poll watchers.
//!
//! # Overview
//!
//! Workers join a named group with a fixed partition count and receive
//! continuously updated assignments. Each partition moves through a
//! handshake (`Starting` → `Running` → `Stopping` → `Starting` on its next
//! owner) so a worker releases a partition before another acquires it.
//! Every externally observable change bumps the group version by exactly
//! one; watchers subscribe from a version and receive the next snapshot at
//! or above it.

mod allocator;
mod coordinator;
mod error;
mod state;
mod timer;
mod types;

pub use allocator::allocate;
pub use coordinator::{Coordinator, WatchRequest};
pub use error::{CoordinatorError, CoordinatorResult};
pub use state::{GroupState, NodeLiveness};
pub use timer::{MockTimerFactory, TimerFactory, TimerHandle, TokioTimerHandle};
pub use types::{
    GroupData, GroupVersion, NotifyAction, NotifyPartitionData, PartitionId, PartitionInfo,
    PartitionStatus,
};
