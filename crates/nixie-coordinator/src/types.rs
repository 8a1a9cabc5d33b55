//! Group data model
//!
//! These types double as the wire representation: snapshots are serialized
//! to JSON text frames exactly as stored, with camelCase field names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing group version
pub type GroupVersion = u64;

/// Index of a partition within a group, `0..partition_count`
pub type PartitionId = u32;

/// Lifecycle state of a partition
///
/// Serialized as its integer discriminant. An out-of-range discriminant
/// fails at decode time, so downstream code never observes an invalid
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PartitionStatus {
    /// Unassigned, no owner
    #[default]
    Init,
    /// Assigned, waiting for the owner to acknowledge it is running
    Starting,
    /// Owned and running
    Running,
    /// Owner is releasing; `next_owner` (if any) takes over afterwards
    Stopping,
}

impl From<PartitionStatus> for u8 {
    fn from(status: PartitionStatus) -> u8 {
        match status {
            PartitionStatus::Init => 0,
            PartitionStatus::Starting => 1,
            PartitionStatus::Running => 2,
            PartitionStatus::Stopping => 3,
        }
    }
}

impl TryFrom<u8> for PartitionStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Init),
            1 => Ok(Self::Starting),
            2 => Ok(Self::Running),
            3 => Ok(Self::Stopping),
            other => Err(format!("invalid partition status: {}", other)),
        }
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// State of one partition entry in a group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub status: PartitionStatus,
    /// Node currently (or about to be) running the partition; empty only
    /// when `Init`
    #[serde(default)]
    pub owner: String,
    /// Node taking over after a `Stopping` handshake completes; empty
    /// otherwise
    #[serde(default)]
    pub next_owner: String,
    /// Group version effective at the last mutation of this entry
    #[serde(default)]
    pub mod_version: GroupVersion,
}

impl PartitionInfo {
    /// Entry handed to a new owner
    pub fn starting(owner: impl Into<String>, mod_version: GroupVersion) -> Self {
        Self {
            status: PartitionStatus::Starting,
            owner: owner.into(),
            next_owner: String::new(),
            mod_version,
        }
    }

    /// Entry whose owner is releasing in favor of `next_owner`
    pub fn stopping(
        owner: impl Into<String>,
        next_owner: impl Into<String>,
        mod_version: GroupVersion,
    ) -> Self {
        Self {
            status: PartitionStatus::Stopping,
            owner: owner.into(),
            next_owner: next_owner.into(),
            mod_version,
        }
    }

    /// Entry returned to the unassigned pool
    pub fn reset(mod_version: GroupVersion) -> Self {
        Self {
            status: PartitionStatus::Init,
            owner: String::new(),
            next_owner: String::new(),
            mod_version,
        }
    }
}

/// Complete externally visible state of a group at a particular version
///
/// Snapshots are delivered to watchers by value and never mutated after
/// delivery. `nodes` is sorted lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupData {
    pub version: GroupVersion,
    pub nodes: Vec<String>,
    pub partitions: Vec<PartitionInfo>,
}

/// Acknowledgement action reported by a partition owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NotifyAction {
    /// The owner finished starting the partition
    Running,
    /// The owner finished releasing the partition
    Stopped,
}

impl From<NotifyAction> for u8 {
    fn from(action: NotifyAction) -> u8 {
        match action {
            NotifyAction::Running => 1,
            NotifyAction::Stopped => 2,
        }
    }
}

impl TryFrom<u8> for NotifyAction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Running),
            2 => Ok(Self::Stopped),
            other => Err(format!("invalid notify action: {}", other)),
        }
    }
}

/// One handshake acknowledgement from a worker
///
/// `last_version` must equal the acknowledged entry's `mod_version`; a stale
/// acknowledgement is rejected. The legacy field spelling `initVersion` is
/// accepted on input only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyPartitionData {
    pub action: NotifyAction,
    pub partition: PartitionId,
    #[serde(alias = "initVersion")]
    pub last_version: GroupVersion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_status_roundtrip() {
        for status in [
            PartitionStatus::Init,
            PartitionStatus::Starting,
            PartitionStatus::Running,
            PartitionStatus::Stopping,
        ] {
            let raw = u8::from(status);
            assert_eq!(PartitionStatus::try_from(raw), Ok(status));
        }
    }

    #[test]
    fn test_partition_status_invalid() {
        assert!(PartitionStatus::try_from(4).is_err());
    }

    #[test]
    fn test_partition_info_wire_names() {
        let info = PartitionInfo::stopping("node01", "node02", 7);
        let json = serde_json::to_value(&info).unwrap();

        assert_eq!(json["status"], 3);
        assert_eq!(json["owner"], "node01");
        assert_eq!(json["nextOwner"], "node02");
        assert_eq!(json["modVersion"], 7);
    }

    #[test]
    fn test_group_data_decode() {
        let raw = r#"{
            "version": 2,
            "nodes": ["node01"],
            "partitions": [
                {"status": 1, "owner": "node01", "nextOwner": "", "modVersion": 1}
            ]
        }"#;

        let data: GroupData = serde_json::from_str(raw).unwrap();
        assert_eq!(data.version, 2);
        assert_eq!(data.nodes, vec!["node01".to_string()]);
        assert_eq!(data.partitions, vec![PartitionInfo::starting("node01", 1)]);
    }

    #[test]
    fn test_group_data_invalid_status_rejected() {
        let raw = r#"{
            "version": 2,
            "nodes": ["node01"],
            "partitions": [
                {"status": 4, "owner": "", "nextOwner": "", "modVersion": 1}
            ]
        }"#;

        assert!(serde_json::from_str::<GroupData>(raw).is_err());
    }

    #[test]
    fn test_notify_data_last_version_alias() {
        let current: NotifyPartitionData =
            serde_json::from_str(r#"{"action": 1, "partition": 0, "lastVersion": 3}"#).unwrap();
        let legacy: NotifyPartitionData =
            serde_json::from_str(r#"{"action": 1, "partition": 0, "initVersion": 3}"#).unwrap();

        assert_eq!(current, legacy);
        assert_eq!(current.last_version, 3);

        // Output always uses the standardized name
        let json = serde_json::to_string(&current).unwrap();
        assert!(json.contains("lastVersion"));
        assert!(!json.contains("initVersion"));
    }

    #[test]
    fn test_notify_action_invalid() {
        assert!(serde_json::from_str::<NotifyPartitionData>(
            r#"{"action": 3, "partition": 0, "lastVersion": 1}"#
        )
        .is_err());
    }
}
