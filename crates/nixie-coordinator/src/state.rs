//! Per-group assignment state machine
//!
//! TigerStyle: Explicit transitions, observable version discipline.
//!
//! All operations are synchronous and assume serialized access; the
//! coordinator holds the group lock for the duration of every transition.
//! Transitions stamp touched entries with `version + 1` and report whether
//! anything changed; the caller applies the single version bump covering the
//! whole externally observed transition.

use crate::allocator::allocate;
use crate::timer::{TimerFactory, TimerHandle};
use crate::types::{GroupData, GroupVersion, PartitionId, PartitionInfo, PartitionStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Liveness of a group member
///
/// A disconnected node becomes a zombie: it keeps its partitions until the
/// expiry timer fires or it re-joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeLiveness {
    #[default]
    Alive,
    Zombie,
}

/// State machine for one group
pub struct GroupState {
    version: GroupVersion,
    nodes: HashMap<String, NodeLiveness>,
    partitions: Vec<PartitionInfo>,
    timers: HashMap<String, Box<dyn TimerHandle>>,
    timer_factory: Arc<dyn TimerFactory>,
    expire_after: Duration,
}

impl GroupState {
    /// Create an empty group with `partition_count` unassigned partitions
    pub fn new(
        partition_count: u32,
        timer_factory: Arc<dyn TimerFactory>,
        expire_after: Duration,
    ) -> Self {
        debug_assert!(partition_count >= 1);

        Self {
            version: 0,
            nodes: HashMap::new(),
            partitions: vec![PartitionInfo::default(); partition_count as usize],
            timers: HashMap::new(),
            timer_factory,
            expire_after,
        }
    }

    /// Seed a group from a snapshot replayed by a reconnecting peer.
    ///
    /// All previous nodes come back as zombies with armed expiry timers, so
    /// workers that reconnect promptly resume their prior partitions without
    /// thrashing. The version continues one past the snapshot's.
    pub fn with_prev_state(
        partition_count: u32,
        timer_factory: Arc<dyn TimerFactory>,
        expire_after: Duration,
        prev: &GroupData,
    ) -> Self {
        debug_assert_eq!(prev.partitions.len(), partition_count as usize);

        let mut state = Self {
            version: prev.version,
            nodes: HashMap::new(),
            partitions: prev.partitions.clone(),
            timers: HashMap::new(),
            timer_factory,
            expire_after,
        };

        for node in &prev.nodes {
            state.nodes.insert(node.clone(), NodeLiveness::Zombie);
            state.arm_timer(node);
        }

        state.reallocate();
        state.version += 1;
        state
    }

    pub fn version(&self) -> GroupVersion {
        self.version
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// True when the group has no members, zombies included
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Apply the version bump for a transition that changed state.
    ///
    /// Called exactly once per externally observed change, even when a
    /// notify batch touched several partitions.
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// The externally visible state at the current version
    pub fn snapshot(&self) -> GroupData {
        let mut nodes: Vec<String> = self.nodes.keys().cloned().collect();
        nodes.sort_unstable();

        GroupData {
            version: self.version,
            nodes,
            partitions: self.partitions.clone(),
        }
    }

    /// A node joined the group. Returns true when membership changed.
    ///
    /// A zombie re-joining is restored in place: its timer is cancelled, its
    /// partitions were never touched, and no version bump is due.
    pub fn node_join(&mut self, name: &str) -> bool {
        match self.nodes.get(name) {
            Some(NodeLiveness::Alive) => false,
            Some(NodeLiveness::Zombie) => {
                self.stop_timer(name);
                self.nodes.insert(name.to_string(), NodeLiveness::Alive);
                false
            }
            None => {
                self.nodes.insert(name.to_string(), NodeLiveness::Alive);
                self.reallocate();
                true
            }
        }
    }

    /// A node left the group for good. Returns true when it was a member.
    pub fn node_leave(&mut self, name: &str) -> bool {
        if self.nodes.remove(name).is_none() {
            return false;
        }
        self.stop_timer(name);

        let next_version = self.version + 1;
        for partition in &mut self.partitions {
            if partition.status == PartitionStatus::Stopping && partition.owner == name {
                // The releasing holder is gone; promote the successor, or
                // return the partition to the pool when none is queued.
                let successor = std::mem::take(&mut partition.next_owner);
                *partition = if successor.is_empty() {
                    PartitionInfo::reset(next_version)
                } else {
                    PartitionInfo::starting(successor, next_version)
                };
            } else if partition.status == PartitionStatus::Stopping
                && partition.next_owner == name
            {
                // The holder may still complete its release; no successor is
                // queued anymore. Not an observable mutation of the entry.
                partition.next_owner.clear();
            } else if partition.owner == name {
                *partition = PartitionInfo::reset(next_version);
            }
        }

        self.reallocate();
        true
    }

    /// A node's connection dropped: mark it zombie and arm the expiry timer.
    ///
    /// Zombie status is invisible to observers; the node keeps its
    /// partitions until expiry.
    pub fn node_disconnect(&mut self, name: &str) {
        if self.nodes.get(name) == Some(&NodeLiveness::Alive) {
            self.nodes.insert(name.to_string(), NodeLiveness::Zombie);
            self.arm_timer(name);
        }
    }

    /// The expiry timer for a disconnected node fired.
    pub fn node_expired(&mut self, name: &str) -> bool {
        self.timers.remove(name);
        self.node_leave(name)
    }

    /// Owner acknowledges a `Starting` partition is running.
    pub fn notify_running(
        &mut self,
        id: PartitionId,
        owner: &str,
        last_version: GroupVersion,
    ) -> bool {
        let Some(partition) = self.partitions.get_mut(id as usize) else {
            return false;
        };
        if partition.status != PartitionStatus::Starting
            || partition.owner != owner
            || partition.mod_version != last_version
        {
            return false;
        }

        partition.status = PartitionStatus::Running;
        partition.mod_version = self.version + 1;
        true
    }

    /// Owner acknowledges a `Stopping` partition was released.
    pub fn notify_stopped(
        &mut self,
        id: PartitionId,
        owner: &str,
        last_version: GroupVersion,
    ) -> bool {
        let index = id as usize;
        let Some(partition) = self.partitions.get(index) else {
            return false;
        };
        if partition.status != PartitionStatus::Stopping
            || partition.owner != owner
            || partition.mod_version != last_version
        {
            return false;
        }

        let next_version = self.version + 1;
        let successor = partition.next_owner.clone();
        if successor.is_empty() {
            // No successor queued; the freed slot may now go to an existing
            // node.
            self.partitions[index] = PartitionInfo::reset(next_version);
            self.reallocate();
        } else {
            self.partitions[index] = PartitionInfo::starting(successor, next_version);
        }
        true
    }

    /// Recompute target ownership and apply the minimal set of transitions.
    ///
    /// Idempotent. May touch any number of entries; collectively they count
    /// as the caller's single version bump.
    fn reallocate(&mut self) {
        if self.nodes.is_empty() {
            return;
        }

        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort_unstable();

        // Effective prospective ownership: a Stopping partition with a
        // queued successor already belongs to that successor.
        let mut current: BTreeMap<String, Vec<PartitionId>> = BTreeMap::new();
        for (index, partition) in self.partitions.iter().enumerate() {
            let claimant = match partition.status {
                PartitionStatus::Init => continue,
                PartitionStatus::Stopping if !partition.next_owner.is_empty() => {
                    &partition.next_owner
                }
                _ => &partition.owner,
            };
            current
                .entry(claimant.clone())
                .or_default()
                .push(index as PartitionId);
        }

        let expected = allocate(self.partitions.len() as u32, &names, &current);
        let next_version = self.version + 1;

        for (node, ids) in &expected {
            for &id in ids {
                let partition = &mut self.partitions[id as usize];
                match partition.status {
                    PartitionStatus::Init => {
                        *partition = PartitionInfo::starting(node.clone(), next_version);
                    }
                    PartitionStatus::Starting | PartitionStatus::Running => {
                        if partition.owner != *node {
                            *partition = PartitionInfo::stopping(
                                partition.owner.clone(),
                                node.clone(),
                                next_version,
                            );
                        }
                    }
                    PartitionStatus::Stopping => {
                        let effective = if partition.next_owner.is_empty() {
                            &partition.owner
                        } else {
                            &partition.next_owner
                        };
                        // The releasing owner is never queued as its own
                        // successor.
                        if effective != node && node != &partition.owner {
                            // Retarget the queued successor in place; the
                            // release handshake underway keeps its stamp.
                            partition.next_owner = node.clone();
                        }
                    }
                }
            }
        }

        debug_assert!(self
            .partitions
            .iter()
            .all(|p| p.mod_version <= next_version));
        debug_assert!(self.partitions.iter().all(|p| {
            p.next_owner.is_empty()
                || (p.status == PartitionStatus::Stopping && p.next_owner != p.owner)
        }));
    }

    fn arm_timer(&mut self, name: &str) {
        let handle = self.timer_factory.schedule(name, self.expire_after);
        self.timers.insert(name.to_string(), handle);
    }

    fn stop_timer(&mut self, name: &str) {
        if let Some(mut handle) = self.timers.remove(name) {
            handle.stop();
        }
    }
}

impl std::fmt::Debug for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupState")
            .field("version", &self.version)
            .field("nodes", &self.nodes)
            .field("partitions", &self.partitions)
            .field("pending_timers", &self.timers.len())
            .finish()
    }
}
