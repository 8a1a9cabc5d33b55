//! Inbound command validation
//!
//! TigerStyle: Reject early, with explicit reasons.
//!
//! Schema and semantic checks applied to every frame before it reaches the
//! coordinator. Enum-valued fields (partition status, notify action) are
//! range-checked by the typed decode itself, so they do not reappear here.

use crate::command::{CommandType, GroupSecret, ServerCommand, ServerJoinCommand, ServerWatchRequest};
use nixie_coordinator::{GroupData, NotifyPartitionData, PartitionId};
use std::collections::HashMap;
use thiserror::Error;

/// Rejection of an inbound command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid cmd type, must be 'join'")]
    NotJoinCommand,
    #[error("'join' field must not be empty")]
    MissingJoinPayload,
    #[error("'groupName' field must not be empty")]
    EmptyGroupName,
    #[error("'nodeName' field must not be empty")]
    EmptyNodeName,
    #[error("'partitionCount' field must >= 1")]
    InvalidPartitionCount,
    #[error("previous state 'version' field must >= 1")]
    PrevStateVersionZero,
    #[error("previous state 'nodes' field must not be empty")]
    PrevStateNodesEmpty,
    #[error("previous state 'partitions' field is missing")]
    PrevStatePartitionsMissing,
    #[error("previous state partitions 'modVersion' field is too big")]
    PrevStateModVersionTooBig,
    #[error("group secret not existed")]
    UnknownGroupSecret,
    #[error("invalid 'secret' for write permission")]
    InvalidWriteSecret,
    #[error("invalid cmd type, must be 'notify'")]
    NotNotifyCommand,
    #[error("'partition' field is too big")]
    PartitionTooBig,
    #[error("groupName must not be empty")]
    EmptyWatchGroupName,
    #[error("invalid 'secret' for read permission")]
    InvalidReadSecret,
}

/// Result type for command validation
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;

/// Validate a join command and return its payload.
pub fn validate_join_command<'a>(
    cmd: &'a ServerCommand,
    group_secrets: &HashMap<String, GroupSecret>,
) -> ValidationResult<&'a ServerJoinCommand> {
    if cmd.command_type != CommandType::Join {
        return Err(ValidationError::NotJoinCommand);
    }
    let join = cmd.join.as_ref().ok_or(ValidationError::MissingJoinPayload)?;

    validate_join_basic_params(join, group_secrets)?;

    if let Some(prev) = join.prev_state.as_ref() {
        validate_prev_state(prev, join.partition_count)?;
    }
    Ok(join)
}

fn validate_join_basic_params(
    join: &ServerJoinCommand,
    group_secrets: &HashMap<String, GroupSecret>,
) -> ValidationResult<()> {
    if join.group_name.is_empty() {
        return Err(ValidationError::EmptyGroupName);
    }
    if join.node_name.is_empty() {
        return Err(ValidationError::EmptyNodeName);
    }
    if join.partition_count == 0 {
        return Err(ValidationError::InvalidPartitionCount);
    }

    if !group_secrets.is_empty() {
        let secret = group_secrets
            .get(&join.group_name)
            .ok_or(ValidationError::UnknownGroupSecret)?;
        if join.secret != secret.write {
            return Err(ValidationError::InvalidWriteSecret);
        }
    }
    Ok(())
}

fn validate_prev_state(prev: &GroupData, partition_count: u32) -> ValidationResult<()> {
    if prev.version == 0 {
        return Err(ValidationError::PrevStateVersionZero);
    }
    if prev.nodes.is_empty() {
        return Err(ValidationError::PrevStateNodesEmpty);
    }
    if prev.partitions.len() != partition_count as usize {
        return Err(ValidationError::PrevStatePartitionsMissing);
    }
    for partition in &prev.partitions {
        if partition.mod_version > prev.version {
            return Err(ValidationError::PrevStateModVersionTooBig);
        }
    }
    Ok(())
}

/// Validate a notify command against the session's partition count and
/// return its entries.
pub fn validate_notify_command(
    cmd: &ServerCommand,
    partition_count: u32,
) -> ValidationResult<&[NotifyPartitionData]> {
    if cmd.command_type != CommandType::Notify {
        return Err(ValidationError::NotNotifyCommand);
    }
    for entry in &cmd.notify {
        if entry.partition >= partition_count as PartitionId {
            return Err(ValidationError::PartitionTooBig);
        }
    }
    Ok(&cmd.notify)
}

/// Validate a read-only watch request.
pub fn validate_watch_request(
    request: &ServerWatchRequest,
    group_secrets: &HashMap<String, GroupSecret>,
) -> ValidationResult<()> {
    if request.group_name.is_empty() {
        return Err(ValidationError::EmptyWatchGroupName);
    }
    if !group_secrets.is_empty() {
        let secret = group_secrets
            .get(&request.group_name)
            .ok_or(ValidationError::UnknownGroupSecret)?;
        if request.secret != secret.read {
            return Err(ValidationError::InvalidReadSecret);
        }
    }
    Ok(())
}
