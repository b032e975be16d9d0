//! Cluster Boundary Module
//!
//! Everything the map service needs to know about the cluster, consumed rather than computed.
//!
//! ## Core Concepts
//! - **Members**: identity and address of nodes; lite members hold no partitions.
//! - **Partition assignment**: a [`PartitionService`](partition_table::PartitionService) tells
//!   which member owns which partition. Computing the assignment is the membership layer's job.
//! - **Ownership snapshot**: [`OwnedPartitions`](ownership::OwnedPartitions) caches the partitions
//!   owned locally and swaps the whole set atomically on reload.
//! - **Cluster state**: gates background maintenance such as the expiration sweep.

pub mod ownership;
pub mod partition_table;
pub mod types;
