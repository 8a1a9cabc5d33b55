//! Snapshot diffing
//!
//! Pure helpers turning successive snapshots into listener invocations and
//! handshake acknowledgements.

use nixie_coordinator::{
    GroupData, NotifyAction, NotifyPartitionData, PartitionId, PartitionInfo, PartitionStatus,
};
use std::collections::HashMap;

/// Multiset inequality of two member lists, order-insensitive.
pub(crate) fn nodes_changed(previous: &[String], current: &[String]) -> bool {
    let mut visited: HashMap<&str, bool> =
        previous.iter().map(|node| (node.as_str(), false)).collect();

    for node in current {
        match visited.get_mut(node.as_str()) {
            Some(seen) => *seen = true,
            None => return true,
        }
    }
    visited.values().any(|seen| !seen)
}

/// The owner a worker should act on: set only while the partition runs.
pub(crate) fn effective_owner(partition: &PartitionInfo) -> &str {
    if partition.status == PartitionStatus::Running {
        &partition.owner
    } else {
        ""
    }
}

/// Acknowledgements this node owes for a freshly received snapshot.
///
/// An entry is due for every partition newer than the previous snapshot and
/// owned by this node: a `Starting` entry gets a running acknowledgement, a
/// `Stopping` entry a stopped one, each stamped with the entry's current
/// `mod_version`.
pub(crate) fn notify_list(
    node_name: &str,
    previous: Option<&GroupData>,
    current: &GroupData,
) -> Vec<NotifyPartitionData> {
    let mut acknowledgements = Vec::new();

    for (index, partition) in current.partitions.iter().enumerate() {
        let previous_mod = previous
            .and_then(|snapshot| snapshot.partitions.get(index))
            .map_or(0, |p| p.mod_version);

        if partition.mod_version <= previous_mod || partition.owner != node_name {
            continue;
        }

        let action = match partition.status {
            PartitionStatus::Starting => NotifyAction::Running,
            PartitionStatus::Stopping => NotifyAction::Stopped,
            PartitionStatus::Init | PartitionStatus::Running => continue,
        };
        acknowledgements.push(NotifyPartitionData {
            action,
            partition: index as PartitionId,
            last_version: partition.mod_version,
        });
    }

    acknowledgements
}
