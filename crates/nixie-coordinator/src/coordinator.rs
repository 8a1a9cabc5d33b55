//! Group registry and watch fan-out
//!
//! The coordinator serializes every state transition under one async mutex
//! per group. The registry-level `RwLock` is taken in read mode for lookup
//! and write mode for creation and deletion; lock order is always registry
//! then group, and the group lock is acquired while the registry guard is
//! still held so a concurrent GC can never orphan a group being populated.
//! Nothing suspends under the group lock except lock acquisition itself:
//! snapshot delivery uses buffered channels and `try_send`.

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::state::GroupState;
use crate::timer::{TimerFactory, TimerHandle, TokioTimerHandle};
use crate::types::{GroupData, GroupVersion, NotifyAction, NotifyPartitionData};
use nixie_core::constants::NODE_EXPIRED_MS_DEFAULT;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// One-shot subscription for the next snapshot at or above a version
///
/// The sender must be buffered (capacity >= 1) so delivery never blocks; the
/// same channel must not be registered twice concurrently.
pub struct WatchRequest {
    pub from_version: GroupVersion,
    pub sender: mpsc::Sender<GroupData>,
}

type GroupHandle = Arc<Mutex<GroupCore>>;

/// Registry of assignment groups
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    groups: RwLock<HashMap<String, GroupHandle>>,
    node_expired_after: Duration,
}

#[derive(Default)]
struct GroupCore {
    /// Absent for a group created by a watch before any join
    state: Option<GroupState>,
    watchers: Vec<mpsc::Sender<GroupData>>,
}

impl GroupCore {
    /// Delete iff the state is absent or has zero nodes, and the wait-list
    /// is empty.
    fn needs_delete(&self) -> bool {
        self.watchers.is_empty() && self.state.as_ref().map_or(true, GroupState::is_empty)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(Duration::from_millis(NODE_EXPIRED_MS_DEFAULT))
    }
}

impl Coordinator {
    /// Create a coordinator whose zombie nodes expire after
    /// `node_expired_after`
    pub fn new(node_expired_after: Duration) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                groups: RwLock::new(HashMap::new()),
                node_expired_after,
            }),
        }
    }

    /// Add a node to a group, creating the group on first reference.
    ///
    /// `prev_state` seeds a newly created group from a snapshot replayed by
    /// a reconnecting worker; it is ignored when the group already exists.
    pub async fn join(
        &self,
        group_name: &str,
        node_name: &str,
        partition_count: u32,
        prev_state: Option<GroupData>,
    ) -> CoordinatorResult<()> {
        let mut core = self.inner.lock_or_create_group(group_name).await;

        let seeded = core.state.is_none() && prev_state.is_some();
        let expire_after = self.inner.node_expired_after;
        let factory = self.expiry_factory(group_name);
        let state = core.state.get_or_insert_with(|| match prev_state.as_ref() {
            Some(prev) => GroupState::with_prev_state(partition_count, factory, expire_after, prev),
            None => GroupState::new(partition_count, factory, expire_after),
        });

        if state.partition_count() != partition_count {
            return Err(CoordinatorError::InvalidPartitionCount {
                group: group_name.to_string(),
                existing: state.partition_count(),
                requested: partition_count,
            });
        }

        let changed = state.node_join(node_name);
        if changed {
            state.bump_version();
        }
        if changed || seeded {
            let snapshot = state.snapshot();
            debug!(
                group = %group_name,
                node = %node_name,
                version = snapshot.version,
                "node joined"
            );
            let watchers = &mut core.watchers;
            fan_out(watchers, &snapshot);
        }
        Ok(())
    }

    /// Remove a node from a group. No-op when either is absent.
    pub async fn leave(&self, group_name: &str, node_name: &str) {
        if let Some(mut core) = self.inner.lock_group(group_name).await {
            if let Some(state) = core.state.as_mut() {
                if state.node_leave(node_name) {
                    state.bump_version();
                    let snapshot = state.snapshot();
                    debug!(
                        group = %group_name,
                        node = %node_name,
                        version = snapshot.version,
                        "node left"
                    );
                    fan_out(&mut core.watchers, &snapshot);
                }
            }
        }
        self.inner.maybe_gc(group_name).await;
    }

    /// Mark a node's connection as dropped and start its expiry countdown.
    ///
    /// Zombie status is invisible to observers, so nothing is fanned out.
    pub async fn disconnect(&self, group_name: &str, node_name: &str) {
        let Some(mut core) = self.inner.lock_group(group_name).await else {
            return;
        };
        if let Some(state) = core.state.as_mut() {
            debug!(group = %group_name, node = %node_name, "node disconnected");
            state.node_disconnect(node_name);
        }
    }

    /// Apply a batch of handshake acknowledgements from `owner`.
    ///
    /// The whole batch is at most one observable transition: one version
    /// bump, one fan-out.
    pub async fn notify(&self, group_name: &str, owner: &str, entries: &[NotifyPartitionData]) {
        let Some(mut core) = self.inner.lock_group(group_name).await else {
            return;
        };
        let GroupCore { state, watchers } = &mut *core;
        let Some(state) = state.as_mut() else {
            return;
        };

        let mut changed = false;
        for entry in entries {
            let applied = match entry.action {
                NotifyAction::Running => {
                    state.notify_running(entry.partition, owner, entry.last_version)
                }
                NotifyAction::Stopped => {
                    state.notify_stopped(entry.partition, owner, entry.last_version)
                }
            };
            changed |= applied;
        }

        if changed {
            state.bump_version();
            let snapshot = state.snapshot();
            debug!(
                group = %group_name,
                owner = %owner,
                version = snapshot.version,
                "handshake acknowledged"
            );
            fan_out(watchers, &snapshot);
        }
    }

    /// Subscribe for the next snapshot at or above `from_version`.
    ///
    /// Delivered immediately when the group has state at or past that
    /// version; otherwise enqueued until the next change. Creates the group
    /// as a watcher-holder when absent.
    pub async fn watch(&self, group_name: &str, request: WatchRequest) {
        let mut core = self.inner.lock_or_create_group(group_name).await;

        if let Some(state) = core.state.as_ref() {
            if state.version() >= request.from_version {
                deliver(&request.sender, state.snapshot());
                return;
            }
        }
        core.watchers.push(request.sender);
    }

    /// Drop a pending watch identified by its channel. No-op when absent.
    pub async fn remove_watch(&self, group_name: &str, sender: &mpsc::Sender<GroupData>) {
        if let Some(mut core) = self.inner.lock_group(group_name).await {
            if let Some(position) = core
                .watchers
                .iter()
                .position(|watcher| watcher.same_channel(sender))
            {
                core.watchers.swap_remove(position);
            }
        }
        self.inner.maybe_gc(group_name).await;
    }

    /// Expiry callback for a disconnected node that never came back.
    pub async fn node_expired(&self, group_name: &str, node_name: &str) {
        self.inner.node_expired(group_name, node_name).await;
    }

    /// Number of live groups, for observability and tests
    pub async fn group_count(&self) -> usize {
        self.inner.groups.read().await.len()
    }

    fn expiry_factory(&self, group_name: &str) -> Arc<dyn TimerFactory> {
        Arc::new(ExpiryTimerFactory {
            coordinator: Arc::downgrade(&self.inner),
            group_name: group_name.to_string(),
        })
    }
}

impl CoordinatorInner {
    /// Lock an existing group. The group lock is acquired while the registry
    /// read guard is held, preserving the registry-then-group order.
    async fn lock_group(&self, name: &str) -> Option<OwnedMutexGuard<GroupCore>> {
        let groups = self.groups.read().await;
        let group = groups.get(name)?.clone();
        Some(group.lock_owned().await)
    }

    /// Lock a group, creating it under the registry write lock when absent.
    async fn lock_or_create_group(&self, name: &str) -> OwnedMutexGuard<GroupCore> {
        if let Some(guard) = self.lock_group(name).await {
            return guard;
        }
        let mut groups = self.groups.write().await;
        let group = groups.entry(name.to_string()).or_default().clone();
        group.lock_owned().await
    }

    async fn node_expired(&self, group_name: &str, node_name: &str) {
        if let Some(mut core) = self.lock_group(group_name).await {
            if let Some(state) = core.state.as_mut() {
                if state.node_expired(node_name) {
                    state.bump_version();
                    let snapshot = state.snapshot();
                    debug!(
                        group = %group_name,
                        node = %node_name,
                        version = snapshot.version,
                        "node expired"
                    );
                    fan_out(&mut core.watchers, &snapshot);
                }
            }
        }
        self.maybe_gc(group_name).await;
    }

    /// Remove the group when it is deletable, re-verifying under the
    /// registry write lock.
    async fn maybe_gc(&self, name: &str) {
        {
            let Some(core) = self.lock_group(name).await else {
                return;
            };
            if !core.needs_delete() {
                return;
            }
        }

        let mut groups = self.groups.write().await;
        let deletable = match groups.get(name) {
            Some(group) => group.clone().lock_owned().await.needs_delete(),
            None => false,
        };
        if deletable {
            groups.remove(name);
            debug!(group = %name, "group removed");
        }
    }
}

fn fan_out(watchers: &mut Vec<mpsc::Sender<GroupData>>, snapshot: &GroupData) {
    for watcher in watchers.drain(..) {
        deliver(&watcher, snapshot.clone());
    }
}

fn deliver(watcher: &mpsc::Sender<GroupData>, snapshot: GroupData) {
    let version = snapshot.version;
    if watcher.try_send(snapshot).is_err() {
        debug!(version, "watcher gone before snapshot delivery");
    }
}

/// Production timer factory: sleeps on the runtime, then reports expiry back
/// into the coordinator. Callbacks that find the group or node already gone
/// are dropped silently.
struct ExpiryTimerFactory {
    coordinator: Weak<CoordinatorInner>,
    group_name: String,
}

impl TimerFactory for ExpiryTimerFactory {
    fn schedule(&self, node: &str, after: Duration) -> Box<dyn TimerHandle> {
        let coordinator = self.coordinator.clone();
        let group_name = self.group_name.clone();
        let node_name = node.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.node_expired(&group_name, &node_name).await;
            }
        });
        Box::new(TokioTimerHandle::new(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PartitionInfo, PartitionStatus};
    use nixie_core::constants::WATCH_CHANNEL_CAPACITY;

    fn watch_channel() -> (mpsc::Sender<GroupData>, mpsc::Receiver<GroupData>) {
        mpsc::channel(WATCH_CHANNEL_CAPACITY)
    }

    fn try_recv(rx: &mut mpsc::Receiver<GroupData>) -> Option<GroupData> {
        rx.try_recv().ok()
    }

    async fn watch_from(
        coordinator: &Coordinator,
        group: &str,
        from_version: GroupVersion,
    ) -> mpsc::Receiver<GroupData> {
        let (tx, rx) = watch_channel();
        coordinator
            .watch(
                group,
                WatchRequest {
                    from_version,
                    sender: tx,
                },
            )
            .await;
        rx
    }

    #[tokio::test]
    async fn test_join_partition_count_mismatch() {
        let coordinator = Coordinator::default();
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        let err = coordinator
            .join("group01", "node02", 4, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::InvalidPartitionCount {
                group: "group01".into(),
                existing: 3,
                requested: 4,
            }
        );
    }

    #[tokio::test]
    async fn test_watch_after_changes() {
        let coordinator = Coordinator::default();
        coordinator.join("group01", "node01", 3, None).await.unwrap();
        coordinator.join("group01", "node02", 3, None).await.unwrap();

        let mut rx = watch_from(&coordinator, "group01", 0).await;
        assert_eq!(
            try_recv(&mut rx),
            Some(GroupData {
                version: 2,
                nodes: vec!["node01".into(), "node02".into()],
                partitions: vec![
                    PartitionInfo::starting("node01", 1),
                    PartitionInfo::starting("node01", 1),
                    PartitionInfo::stopping("node01", "node02", 2),
                ],
            })
        );
    }

    #[tokio::test]
    async fn test_watch_before_changes() {
        let coordinator = Coordinator::default();

        let mut rx = watch_from(&coordinator, "group01", 0).await;
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        assert_eq!(
            try_recv(&mut rx),
            Some(GroupData {
                version: 1,
                nodes: vec!["node01".into()],
                partitions: vec![PartitionInfo::starting("node01", 1); 3],
            })
        );

        // The watch was one-shot; a later change is not delivered on it.
        coordinator.join("group01", "node02", 3, None).await.unwrap();
        assert_eq!(try_recv(&mut rx), None);
    }

    #[tokio::test]
    async fn test_watch_future_version_waits() {
        let coordinator = Coordinator::default();
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        let mut rx = watch_from(&coordinator, "group01", 2).await;
        assert_eq!(try_recv(&mut rx), None);

        coordinator.join("group01", "node02", 3, None).await.unwrap();
        let delivered = try_recv(&mut rx).expect("delivered on next change");
        assert_eq!(delivered.version, 2);
    }

    #[tokio::test]
    async fn test_notify_batch_bumps_version_once() {
        let coordinator = Coordinator::default();
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        coordinator
            .notify(
                "group01",
                "node01",
                &[
                    NotifyPartitionData {
                        action: NotifyAction::Running,
                        partition: 0,
                        last_version: 1,
                    },
                    NotifyPartitionData {
                        action: NotifyAction::Running,
                        partition: 1,
                        last_version: 1,
                    },
                ],
            )
            .await;

        let mut rx = watch_from(&coordinator, "group01", 0).await;
        let data = try_recv(&mut rx).expect("snapshot");
        assert_eq!(data.version, 2);
        assert_eq!(data.partitions[0].status, PartitionStatus::Running);
        assert_eq!(data.partitions[0].mod_version, 2);
        assert_eq!(data.partitions[1].status, PartitionStatus::Running);
        assert_eq!(data.partitions[2].status, PartitionStatus::Starting);
    }

    #[tokio::test]
    async fn test_notify_rejected_entries_change_nothing() {
        let coordinator = Coordinator::default();
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        coordinator
            .notify(
                "group01",
                "node02",
                &[NotifyPartitionData {
                    action: NotifyAction::Running,
                    partition: 0,
                    last_version: 1,
                }],
            )
            .await;

        let mut rx = watch_from(&coordinator, "group01", 0).await;
        assert_eq!(try_recv(&mut rx).map(|d| d.version), Some(1));
    }

    #[tokio::test]
    async fn test_handshake_walkthrough() {
        let coordinator = Coordinator::default();
        coordinator.join("group01", "node01", 3, None).await.unwrap();
        coordinator.join("group01", "node02", 3, None).await.unwrap();

        coordinator
            .notify(
                "group01",
                "node01",
                &[NotifyPartitionData {
                    action: NotifyAction::Stopped,
                    partition: 2,
                    last_version: 2,
                }],
            )
            .await;

        let mut rx = watch_from(&coordinator, "group01", 0).await;
        let data = try_recv(&mut rx).expect("snapshot");
        assert_eq!(data.version, 3);
        assert_eq!(data.partitions[2], PartitionInfo::starting("node02", 3));
    }

    #[tokio::test]
    async fn test_join_with_prev_state() {
        let coordinator = Coordinator::default();
        let prev = GroupData {
            version: 20,
            nodes: vec!["node01".into(), "node02".into(), "node03".into()],
            partitions: vec![
                PartitionInfo::starting("node01", 18),
                PartitionInfo::starting("node02", 19),
                PartitionInfo::starting("node03", 20),
            ],
        };

        coordinator
            .join("group01", "node01", 3, Some(prev.clone()))
            .await
            .unwrap();

        let mut rx = watch_from(&coordinator, "group01", 20).await;
        assert_eq!(
            try_recv(&mut rx),
            Some(GroupData {
                version: 21,
                nodes: prev.nodes.clone(),
                partitions: prev.partitions.clone(),
            })
        );
    }

    #[tokio::test]
    async fn test_join_with_prev_state_fans_out_to_earlier_watch() {
        let coordinator = Coordinator::default();
        let mut rx = watch_from(&coordinator, "group01", 0).await;

        let prev = GroupData {
            version: 20,
            nodes: vec!["node01".into(), "node02".into(), "node03".into()],
            partitions: vec![
                PartitionInfo::starting("node01", 18),
                PartitionInfo::starting("node02", 19),
                PartitionInfo::starting("node03", 20),
            ],
        };
        coordinator
            .join("group01", "node01", 3, Some(prev))
            .await
            .unwrap();

        assert_eq!(try_recv(&mut rx).map(|d| d.version), Some(21));
    }

    #[tokio::test]
    async fn test_leave() {
        let coordinator = Coordinator::default();
        coordinator.join("group01", "node01", 3, None).await.unwrap();
        coordinator.join("group01", "node02", 3, None).await.unwrap();

        coordinator.leave("group01", "node02").await;

        let mut rx = watch_from(&coordinator, "group01", 0).await;
        assert_eq!(
            try_recv(&mut rx),
            Some(GroupData {
                version: 3,
                nodes: vec!["node01".into()],
                partitions: vec![
                    PartitionInfo::starting("node01", 1),
                    PartitionInfo::starting("node01", 1),
                    PartitionInfo::stopping("node01", "", 2),
                ],
            })
        );
    }

    #[tokio::test]
    async fn test_leave_unknown_node_changes_nothing() {
        let coordinator = Coordinator::default();
        coordinator.leave("group01", "node-random").await;

        let mut rx = watch_from(&coordinator, "group01", 0).await;
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        assert_eq!(try_recv(&mut rx).map(|d| d.version), Some(1));
    }

    #[tokio::test]
    async fn test_disconnect_then_expire_and_gc() {
        let coordinator = Coordinator::new(Duration::from_millis(10));
        coordinator.join("group01", "node01", 3, None).await.unwrap();
        coordinator.disconnect("group01", "node01").await;

        let mut rx = watch_from(&coordinator, "group01", 2).await;
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert_eq!(
            try_recv(&mut rx),
            Some(GroupData {
                version: 2,
                nodes: vec![],
                partitions: vec![PartitionInfo::reset(2); 3],
            })
        );
        assert_eq!(coordinator.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_watch_before_expiry_sees_nothing() {
        let coordinator = Coordinator::new(Duration::from_millis(60));
        coordinator.join("group01", "node01", 3, None).await.unwrap();
        coordinator.disconnect("group01", "node01").await;

        let mut rx = watch_from(&coordinator, "group01", 2).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(try_recv(&mut rx), None);
        assert_eq!(coordinator.group_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejoin_before_expiry_keeps_state() {
        let coordinator = Coordinator::new(Duration::from_millis(40));
        coordinator.join("group01", "node01", 3, None).await.unwrap();
        coordinator.disconnect("group01", "node01").await;
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;

        // The cancelled timer never fired: membership and version are intact.
        let mut rx = watch_from(&coordinator, "group01", 0).await;
        assert_eq!(
            try_recv(&mut rx),
            Some(GroupData {
                version: 1,
                nodes: vec!["node01".into()],
                partitions: vec![PartitionInfo::starting("node01", 1); 3],
            })
        );
    }

    #[tokio::test]
    async fn test_fan_out_skips_removed_watcher() {
        let coordinator = Coordinator::default();

        let (tx1, mut rx1) = watch_channel();
        let (tx2, mut rx2) = watch_channel();
        let (tx3, mut rx3) = watch_channel();
        for sender in [tx1.clone(), tx2, tx3] {
            coordinator
                .watch(
                    "group01",
                    WatchRequest {
                        from_version: 0,
                        sender,
                    },
                )
                .await;
        }

        coordinator.remove_watch("group01", &tx1).await;
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        assert_eq!(try_recv(&mut rx1), None);
        assert_eq!(try_recv(&mut rx2).map(|d| d.version), Some(1));
        assert_eq!(try_recv(&mut rx3).map(|d| d.version), Some(1));
    }

    #[tokio::test]
    async fn test_remove_watch_unknown_channel_is_noop() {
        let coordinator = Coordinator::default();
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        let (tx, _rx) = watch_channel();
        coordinator.remove_watch("group01", &tx).await;
        assert_eq!(coordinator.group_count().await, 1);
    }

    #[tokio::test]
    async fn test_watcher_holder_group_gc() {
        let coordinator = Coordinator::default();

        let (tx, _rx) = watch_channel();
        coordinator
            .watch(
                "group01",
                WatchRequest {
                    from_version: 0,
                    sender: tx.clone(),
                },
            )
            .await;
        assert_eq!(coordinator.group_count().await, 1);

        coordinator.remove_watch("group01", &tx).await;
        assert_eq!(coordinator.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_all_nodes_leave_group_gc_after_watchers_gone() {
        let coordinator = Coordinator::default();
        coordinator.join("group01", "node01", 3, None).await.unwrap();

        let (tx, mut rx) = watch_channel();
        coordinator
            .watch(
                "group01",
                WatchRequest {
                    from_version: 2,
                    sender: tx,
                },
            )
            .await;

        coordinator.leave("group01", "node01").await;

        // The leave fan-out consumed the watcher, leaving the empty group
        // with no nodes and no watchers.
        assert_eq!(try_recv(&mut rx).map(|d| d.version), Some(2));
        assert_eq!(coordinator.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_join_with_more_nodes_than_partitions() {
        let coordinator = Coordinator::default();
        for node in ["node01", "node02", "node03", "node04"] {
            coordinator.join("group01", node, 2, None).await.unwrap();
        }

        let mut rx = watch_from(&coordinator, "group01", 0).await;
        let data = try_recv(&mut rx).expect("snapshot");
        assert_eq!(data.nodes.len(), 4);

        let owners: Vec<&str> = data
            .partitions
            .iter()
            .map(|p| {
                if p.next_owner.is_empty() {
                    p.owner.as_str()
                } else {
                    p.next_owner.as_str()
                }
            })
            .collect();
        assert_eq!(owners.len(), 2);
        assert_ne!(owners[0], owners[1]);
    }
}
