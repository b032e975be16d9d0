//! Partitioned Map Service Library
//!
//! The node-local coordination layer of a distributed, partitioned in-memory key/value map.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//!
//! - **`cluster`**: What the service consumes from the cluster: partition assignment,
//!   member identity, cluster state and the locally owned partition snapshot.
//! - **`storage`**: Partition containers and record stores, TTL / max-idle records and the
//!   persistence adapters (write-through, write-behind) towards external map stores.
//! - **`executor`**: Partition workers that serialize all operations on a partition, plus
//!   named bounded pools for parallel query work.
//! - **`query`**: Predicates, the optimizer, serial and parallel partition scans and the
//!   result processors (rows and aggregations).
//! - **`event`**: Entry and partition-lost listeners with capability-masked filtering.
//! - **`expiration`**: The periodic sweep evicting expired records.
//! - **`map`**: Map containers, the service context wiring all of the above, map
//!   operations, interceptors and the destroy coordinator.

pub mod cluster;
pub mod config;
pub mod error;
pub mod event;
pub mod executor;
pub mod expiration;
pub mod map;
pub mod query;
pub mod storage;

#[cfg(test)]
mod testing;
