//! Stable partition rebalancing
//!
//! Computes a balanced target assignment while moving as few partitions as
//! possible: every node keeps what it already holds up to its target size,
//! and only the surplus changes owner.

use crate::types::PartitionId;
use std::collections::BTreeMap;

/// Compute the balanced target assignment for a group.
///
/// `nodes` must be sorted and non-empty. `current` lists each node's
/// effective prospective ownership; partitions credited to unknown nodes and
/// partitions credited to nobody end up in the free pool.
///
/// The result assigns every node either `⌊P/k⌋` or `⌈P/k⌉` partitions (the
/// first `P mod k` nodes in sorted order get the larger share), covers
/// `0..partition_count` exactly once, and is deterministic.
pub fn allocate(
    partition_count: u32,
    nodes: &[String],
    current: &BTreeMap<String, Vec<PartitionId>>,
) -> BTreeMap<String, Vec<PartitionId>> {
    debug_assert!(!nodes.is_empty());
    debug_assert!(nodes.windows(2).all(|w| w[0] < w[1]), "nodes must be sorted");

    let node_count = nodes.len() as u32;
    let base = partition_count / node_count;
    let remainder = (partition_count % node_count) as usize;
    let target = |index: usize| -> usize { (base + u32::from(index < remainder)) as usize };

    let mut taken = vec![false; partition_count as usize];
    let mut expected: BTreeMap<String, Vec<PartitionId>> = BTreeMap::new();

    // Every node keeps its current partitions up to its target size.
    for (index, node) in nodes.iter().enumerate() {
        let mut kept = Vec::new();
        if let Some(owned) = current.get(node) {
            for &id in owned {
                debug_assert!((id as usize) < taken.len());
                if kept.len() < target(index) && !taken[id as usize] {
                    taken[id as usize] = true;
                    kept.push(id);
                }
            }
        }
        expected.insert(node.clone(), kept);
    }

    // Surplus and orphaned partitions fill under-capacity nodes, ascending
    // partition id into ascending node order.
    let mut pool = (0..partition_count).filter(|&id| !taken[id as usize]);
    for (index, node) in nodes.iter().enumerate() {
        if let Some(slots) = expected.get_mut(node) {
            while slots.len() < target(index) {
                match pool.next() {
                    Some(id) => slots.push(id),
                    None => {
                        debug_assert!(false, "free pool exhausted before targets were met");
                        return expected;
                    }
                }
            }
        }
    }
    debug_assert!(pool.next().is_none(), "free pool not fully distributed");

    expected
}
