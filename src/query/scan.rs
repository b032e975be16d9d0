//! Partition scans and the two strategies for running them.
//!
//! [`CallerRunsPartitionScanExecutor`] scans one partition after the other on the calling task.
//! [`ParallelPartitionScanExecutor`] submits one blocking scan per partition to the `query`
//! executor and bounds every task by the operation call timeout. Both return exactly the same
//! rows for the same data; only the scheduling differs.

use super::extractors::Extractors;
use super::result::{PartitionScanResult, QueryResultRow};
use super::{IterationType, Query};
use crate::error::{MapError, MapResult};
use crate::executor::service::BoundedExecutor;
use crate::storage::partition_container::PartitionContainer;
use crate::storage::record::now_ms;
use crate::storage::serialization::SerializationService;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Scans the record store of one map on one partition.
pub struct PartitionScanRunner {
    partitions: Arc<Vec<PartitionContainer>>,
    ss: SerializationService,
}

impl PartitionScanRunner {
    pub fn new(partitions: Arc<Vec<PartitionContainer>>, ss: SerializationService) -> Self {
        Self { partitions, ss }
    }

    pub fn run(
        &self,
        query: &Query,
        extractors: &Extractors,
        partition_id: u32,
    ) -> MapResult<PartitionScanResult> {
        assert!(
            (partition_id as usize) < self.partitions.len(),
            "partition {} out of range [0, {})",
            partition_id,
            self.partitions.len()
        );
        let container = &self.partitions[partition_id as usize];
        let Some(store) = container.get_existing_record_store(&query.map_name) else {
            return Ok(PartitionScanResult {
                partition_id,
                rows: Vec::new(),
            });
        };

        let scan_failed = |source: MapError| MapError::PartitionScan {
            partition_id,
            source: source.into(),
        };

        let iteration = query.effective_iteration_type();
        let mut rows = Vec::new();
        for (key_data, value_data) in store.entries(now_ms()) {
            let key = self.ss.to_object(&key_data).map_err(scan_failed)?;
            let value = self.ss.to_object(&value_data).map_err(scan_failed)?;
            if !query.predicate.apply(&key, &value, extractors) {
                continue;
            }
            rows.push(match iteration {
                IterationType::Key => QueryResultRow {
                    key: Some(key_data),
                    value: None,
                },
                IterationType::Value => QueryResultRow {
                    key: None,
                    value: Some(value_data),
                },
                IterationType::Entry => QueryResultRow {
                    key: Some(key_data),
                    value: Some(value_data),
                },
            });
        }

        tracing::trace!(
            "Scanned map '{}' partition {}: {} rows",
            query.map_name,
            partition_id,
            rows.len()
        );
        Ok(PartitionScanResult { partition_id, rows })
    }
}

#[async_trait]
pub trait PartitionScanExecutor: Send + Sync {
    async fn execute(
        &self,
        query: Arc<Query>,
        extractors: Arc<Extractors>,
        partitions: Vec<u32>,
    ) -> MapResult<Vec<PartitionScanResult>>;
}

pub struct CallerRunsPartitionScanExecutor {
    runner: Arc<PartitionScanRunner>,
}

impl CallerRunsPartitionScanExecutor {
    pub fn new(runner: Arc<PartitionScanRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PartitionScanExecutor for CallerRunsPartitionScanExecutor {
    async fn execute(
        &self,
        query: Arc<Query>,
        extractors: Arc<Extractors>,
        partitions: Vec<u32>,
    ) -> MapResult<Vec<PartitionScanResult>> {
        partitions
            .into_iter()
            .map(|partition_id| self.runner.run(&query, &extractors, partition_id))
            .collect()
    }
}

pub struct ParallelPartitionScanExecutor {
    runner: Arc<PartitionScanRunner>,
    executor: Arc<BoundedExecutor>,
    timeout: Duration,
}

impl ParallelPartitionScanExecutor {
    pub fn new(runner: Arc<PartitionScanRunner>, executor: Arc<BoundedExecutor>, timeout: Duration) -> Self {
        Self {
            runner,
            executor,
            timeout,
        }
    }
}

#[async_trait]
impl PartitionScanExecutor for ParallelPartitionScanExecutor {
    async fn execute(
        &self,
        query: Arc<Query>,
        extractors: Arc<Extractors>,
        partitions: Vec<u32>,
    ) -> MapResult<Vec<PartitionScanResult>> {
        let tasks = partitions
            .into_iter()
            .map(|partition_id| {
                let runner = self.runner.clone();
                let query = query.clone();
                let extractors = extractors.clone();
                let handle = self
                    .executor
                    .submit(move || runner.run(&query, &extractors, partition_id));
                (partition_id, handle)
            })
            .collect();

        collect_within(&query.map_name, self.timeout, tasks).await
    }
}

/// Awaits every partition task, each bounded by `timeout`.
///
/// The first failure wins and aborts the tasks still pending, so a timed out query never
/// yields partial results.
pub(crate) async fn collect_within<T: Send + 'static>(
    map_name: &str,
    timeout: Duration,
    tasks: Vec<(u32, JoinHandle<Result<MapResult<T>>>)>,
) -> MapResult<Vec<T>> {
    let aborts: Vec<_> = tasks.iter().map(|(_, handle)| handle.abort_handle()).collect();

    let waits = tasks.into_iter().map(|(partition_id, handle)| async move {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => Err(MapError::PartitionScan {
                partition_id,
                source: e,
            }),
            Ok(Err(join_error)) => Err(MapError::PartitionScan {
                partition_id,
                source: anyhow::anyhow!("partition task failed: {}", join_error),
            }),
            Err(_) => Err(MapError::QueryTimeout {
                map_name: map_name.to_string(),
                timeout,
            }),
        }
    });

    let collected = try_join_all(waits).await;
    if let Err(e) = &collected {
        tracing::warn!("Query on map '{}' aborted: {}", map_name, e);
        for abort in aborts {
            abort.abort();
        }
    }
    collected
}
