//! Caller-visible errors of the map service.
//!
//! Only query failures surface as errors. Lifecycle teardown (destroy, reset,
//! shutdown) is best-effort and reports problems through logs and
//! [`DestroyReport`](crate::map::context::DestroyReport) instead.

use std::time::Duration;
use thiserror::Error as ThisError;

pub type MapResult<T> = std::result::Result<T, MapError>;

#[derive(Debug, ThisError)]
pub enum MapError {
    /// A scan or accumulation task exceeded the per-task budget.
    /// The whole query is aborted and no partial rows are returned.
    #[error("query on map '{map_name}' timed out after {timeout:?}")]
    QueryTimeout { map_name: String, timeout: Duration },

    /// A partition-level scan failed. Propagated verbatim, never retried here.
    #[error("scan of partition {partition_id} failed: {source}")]
    PartitionScan {
        partition_id: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("query result size exceeded the limit of {limit} rows")]
    QueryResultSizeExceeded { limit: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("map store error: {0}")]
    MapStore(#[source] anyhow::Error),

    /// The execution context that should have run the operation is gone.
    #[error("executor '{0}' is shut down")]
    ExecutorShutdown(String),
}

impl MapError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, MapError::QueryTimeout { .. })
    }
}
