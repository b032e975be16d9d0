//! Partition Storage Module
//!
//! Per-partition storage of map data on this node.
//!
//! ## Core Concepts
//! - **Partition container**: one per partition, allocated once at startup, holding the record
//!   stores of every map that has data on that partition.
//! - **Record store**: the key/value shard of one map on one partition, with TTL / max-idle
//!   metadata per record.
//! - **Persistence adapter**: each record store reads through and writes through (or behind)
//!   to the map's external store via a `MapDataStore`.
//! - **Store worker**: a periodic task writing out write-behind entries once their delay
//!   has elapsed.
//! - **Serialization boundary**: stores hold wire `Data`; callers see application values.

pub mod map_data_store;
pub mod partition_container;
pub mod record;
pub mod record_store;
pub mod serialization;
pub mod store_worker;
