//! Execution Service
//!
//! Two kinds of execution contexts:
//!
//! - **Partition workers**: a fixed set of background tasks. Partition `p` is always served by
//!   worker `p % worker_count`, and a worker runs its queued operations one at a time, so a
//!   record store is only ever mutated from one place.
//! - **Named bounded executors**: shared pools (e.g. `query`) that run blocking work on the
//!   blocking thread pool with at most `pool_size` tasks in flight.

use super::types::{CompletionHandle, PartitionOperation};
use crate::cluster::types::GENERIC_PARTITION_ID;
use crate::error::{MapError, MapResult};

use anyhow::Result;
use dashmap::DashMap;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;

pub const QUERY_EXECUTOR: &str = "query";

pub struct ExecutionService {
    partition_count: u32,
    workers: Vec<mpsc::UnboundedSender<PartitionOperation>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    executors: DashMap<String, Arc<BoundedExecutor>>,
    shutdown: AtomicBool,
}

impl ExecutionService {
    /// Spawns the partition workers. Must be called within a tokio runtime.
    pub fn new(partition_count: u32, worker_count: usize) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let (sender, receiver) = mpsc::unbounded_channel();
            workers.push(sender);
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, receiver).await;
            }));
        }

        tracing::info!(
            "Started {} partition workers for {} partitions",
            worker_count,
            partition_count
        );

        Arc::new(Self {
            partition_count,
            workers,
            worker_handles: Mutex::new(handles),
            executors: DashMap::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_of(&self, partition_id: u32) -> usize {
        partition_id as usize % self.workers.len()
    }

    /// Queues `operation` on the worker owning `partition_id`.
    ///
    /// Panics on the generic partition id or an out-of-range id: callers must never
    /// construct those.
    pub fn submit_to_partition<F, Fut, T>(&self, partition_id: u32, operation: F) -> CompletionHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        assert!(
            partition_id != GENERIC_PARTITION_ID,
            "Cannot submit to GENERIC_PARTITION_ID"
        );
        assert!(
            partition_id < self.partition_count,
            "partition {} out of range [0, {})",
            partition_id,
            self.partition_count
        );

        let (sender, receiver) = oneshot::channel();
        let task: PartitionOperation = Box::pin(async move {
            let result = operation().await;
            let _ = sender.send(result);
        });

        if self.shutdown.load(Ordering::SeqCst)
            || self.workers[self.worker_of(partition_id)].send(task).is_err()
        {
            tracing::warn!(
                "Partition {} operation rejected, execution service is shut down",
                partition_id
            );
        }
        CompletionHandle::new(partition_id, receiver)
    }

    /// Runs `operation` on the partition's worker and waits for its result.
    pub async fn run_on_partition<F, Fut, T>(&self, partition_id: u32, operation: F) -> MapResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_to_partition(partition_id, operation)
            .join()
            .await
            .ok_or_else(|| MapError::ExecutorShutdown(format!("partition-{}", partition_id)))
    }

    /// Returns the named executor, creating it with `pool_size` on first use.
    pub fn get_or_create_executor(&self, name: &str, pool_size: usize) -> Arc<BoundedExecutor> {
        self.executors
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Created executor '{}' with pool size {}", name, pool_size);
                Arc::new(BoundedExecutor::new(name, pool_size))
            })
            .clone()
    }

    pub fn executor(&self, name: &str) -> Option<Arc<BoundedExecutor>> {
        self.executors.get(name).map(|e| e.clone())
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stops all workers and closes the named executors. Queued operations are dropped.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        for executor in self.executors.iter() {
            executor.value().shutdown();
        }
        let handles = std::mem::take(
            &mut *self
                .worker_handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            handle.abort();
        }
        tracing::info!("Execution service shut down");
    }
}

async fn worker_loop(worker_id: usize, mut receiver: mpsc::UnboundedReceiver<PartitionOperation>) {
    tracing::debug!("Partition worker {} started", worker_id);

    while let Some(operation) = receiver.recv().await {
        // A panicking operation drops its completion sender; the worker keeps going.
        if AssertUnwindSafe(operation).catch_unwind().await.is_err() {
            tracing::error!("Partition operation panicked on worker {}", worker_id);
        }
    }

    tracing::debug!("Partition worker {} stopped", worker_id);
}

/// A named pool bounding how many blocking tasks run at once.
pub struct BoundedExecutor {
    name: String,
    pool_size: usize,
    permits: Arc<Semaphore>,
}

impl BoundedExecutor {
    pub fn new(name: &str, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            name: name.to_string(),
            pool_size,
            permits: Arc::new(Semaphore::new(pool_size)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Runs `task` on the blocking pool once a slot is free.
    pub fn submit<F, T>(&self, task: F) -> JoinHandle<Result<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| anyhow::anyhow!("executor '{}' is shut down", name))?;
            tokio::task::spawn_blocking(task)
                .await
                .map_err(|e| anyhow::anyhow!("task on executor '{}' failed: {}", name, e))
        })
    }

    pub fn shutdown(&self) {
        self.permits.close();
    }
}
