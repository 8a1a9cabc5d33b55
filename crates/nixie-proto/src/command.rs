//! Command frames
//!
//! Every frame is a JSON-encoded UTF-8 text message. Field names are part of
//! the wire contract and never change.

use nixie_coordinator::{GroupData, NotifyPartitionData};
use serde::{Deserialize, Serialize};

/// Tag discriminating writable-endpoint commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Join,
    Notify,
}

/// Envelope for commands on the writable endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCommand {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<ServerJoinCommand>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<NotifyPartitionData>,
}

impl ServerCommand {
    /// Build a join command
    pub fn join(join: ServerJoinCommand) -> Self {
        Self {
            command_type: CommandType::Join,
            join: Some(join),
            notify: Vec::new(),
        }
    }

    /// Build a notify command carrying handshake acknowledgements
    pub fn notify(entries: Vec<NotifyPartitionData>) -> Self {
        Self {
            command_type: CommandType::Notify,
            join: None,
            notify: entries,
        }
    }
}

/// Join payload: group membership declaration
///
/// `prev_state` replays the last snapshot a reconnecting worker received, so
/// a restarted coordinator can resume prior ownership without thrashing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerJoinCommand {
    pub group_name: String,
    pub node_name: String,
    pub partition_count: u32,
    #[serde(default)]
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_state: Option<GroupData>,
}

/// Subscription request on the read-only endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerWatchRequest {
    pub group_name: String,
    #[serde(default)]
    pub secret: String,
}

/// Per-group shared secrets; configuring none disables auth entirely
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSecret {
    pub write: String,
    pub read: String,
}
