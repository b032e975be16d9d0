//! Map Service Module
//!
//! The coordination layer of the partitioned map: per-map containers, the service context
//! that owns every partition container, and the operations routed through it.
//!
//! ## Core Concepts
//! - **Map container**: per-map metadata on this node (config snapshot, interceptors,
//!   attribute extractors, map store context). Created once per name, on first use.
//! - **Record store**: the data of one map on one partition, created lazily inside the
//!   partition container.
//! - **Destroy**: near cache and listeners are always torn down; everything else only if the
//!   map exists on this node. Partitions are destroyed on their own workers and waited for
//!   with a bound.

pub mod container;
pub mod context;
pub mod interceptor;
pub mod near_cache;
pub mod operations;
pub mod registry;
pub mod stats;
pub mod wan;
