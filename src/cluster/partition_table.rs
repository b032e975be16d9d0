//! Partition assignment as consumed by this node.
//!
//! The map service never computes ownership on its own: it asks a [`PartitionService`]
//! for the current assignment. [`PartitionTable`] is an explicit, settable assignment
//! used for single-node embedding and tests.

use super::types::{Member, NodeId};
use crate::storage::serialization::Data;

use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Boundary to the cluster membership layer.
pub trait PartitionService: Send + Sync {
    fn partition_count(&self) -> u32;

    fn local_member(&self) -> Member;

    /// Partitions currently owned by `member`.
    fn member_partitions(&self, member: &NodeId) -> Vec<u32>;

    fn partition_owner(&self, partition_id: u32) -> Option<NodeId>;

    /// Key to partition routing.
    fn partition_id_of(&self, key: &Data) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partition_count() as u64) as u32
    }
}

pub struct PartitionTable {
    num_partitions: u32,
    local_member: Member,
    owners: DashMap<u32, NodeId>,
}

impl PartitionTable {
    /// Empty table, nothing assigned yet.
    pub fn new(num_partitions: u32, local_member: Member) -> Arc<Self> {
        assert!(num_partitions > 0, "partition count must be positive");
        Arc::new(Self {
            num_partitions,
            local_member,
            owners: DashMap::new(),
        })
    }

    /// A table where the local member owns every partition.
    pub fn single_node(num_partitions: u32) -> Arc<Self> {
        let local = Member::new(([127, 0, 0, 1], 5701).into());
        let table = Self::new(num_partitions, local);
        let local_id = table.local_member.id.clone();
        for partition in 0..num_partitions {
            table.owners.insert(partition, local_id.clone());
        }
        table
    }

    pub fn assign(&self, partition_id: u32, owner: NodeId) {
        assert!(
            partition_id < self.num_partitions,
            "partition {} out of range",
            partition_id
        );
        self.owners.insert(partition_id, owner);
    }

    pub fn unassign(&self, partition_id: u32) {
        self.owners.remove(&partition_id);
    }

    /// Spreads partitions over `members` by sorted id, `partition % members`.
    pub fn assign_round_robin(&self, members: &[NodeId]) {
        if members.is_empty() {
            self.owners.clear();
            return;
        }
        let mut node_ids = members.to_vec();
        node_ids.sort();
        for partition in 0..self.num_partitions {
            let owner = node_ids[(partition as usize) % node_ids.len()].clone();
            self.owners.insert(partition, owner);
        }
    }
}

impl PartitionService for PartitionTable {
    fn partition_count(&self) -> u32 {
        self.num_partitions
    }

    fn local_member(&self) -> Member {
        self.local_member.clone()
    }

    fn member_partitions(&self, member: &NodeId) -> Vec<u32> {
        let mut partitions: Vec<u32> = self
            .owners
            .iter()
            .filter(|entry| entry.value() == member)
            .map(|entry| *entry.key())
            .collect();
        partitions.sort_unstable();
        partitions
    }

    fn partition_owner(&self, partition_id: u32) -> Option<NodeId> {
        self.owners.get(&partition_id).map(|owner| owner.clone())
    }
}
