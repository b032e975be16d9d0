use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Sentinel used by cluster-wide (non partition-bound) operations.
/// Never valid as an index into the partition container array.
pub const GENERIC_PARTITION_ID: u32 = u32::MAX;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A cluster member as seen by this node.
///
/// Lite members hold no partitions, but may still own near caches and listeners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub id: NodeId,
    pub address: SocketAddr,
    pub lite_member: bool,
}

impl Member {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            id: NodeId::new(),
            address,
            lite_member: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClusterState {
    Active,
    NoMigration,
    Frozen,
    Passive,
    InTransition,
}

impl ClusterState {
    /// Whether background data maintenance (e.g. the expiration sweep) may run.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            ClusterState::Active | ClusterState::NoMigration | ClusterState::Frozen
        )
    }
}
