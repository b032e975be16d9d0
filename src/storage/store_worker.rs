//! Store Worker
//!
//! Periodically writes out write-behind entries whose delay has elapsed, so a map that
//! stops receiving mutations still reaches its map store. Each flush runs on the
//! partition's worker, like any other mutation of the record store.

use super::partition_container::PartitionContainer;
use super::record::now_ms;
use crate::executor::service::ExecutionService;
use crate::executor::types::CompletionHandle;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

enum State {
    Idle,
    Running(JoinHandle<()>),
    ShutDown,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct StoreWorker {
    partitions: Arc<Vec<PartitionContainer>>,
    execution: Arc<ExecutionService>,
    period: Duration,
    state: Arc<Mutex<State>>,
    flushed: Arc<AtomicU64>,
}

impl StoreWorker {
    pub fn new(
        partitions: Arc<Vec<PartitionContainer>>,
        execution: Arc<ExecutionService>,
        period: Duration,
    ) -> Self {
        Self {
            partitions,
            execution,
            period: period.max(Duration::from_millis(1)),
            state: Arc::new(Mutex::new(State::Idle)),
            flushed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(&self) {
        let mut state = lock(&self.state);
        if !matches!(*state, State::Idle) {
            return;
        }

        let partitions = self.partitions.clone();
        let execution = self.execution.clone();
        let gate = self.state.clone();
        let flushed = self.flushed.clone();
        let period = self.period;

        *state = State::Running(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let pending = {
                    let state = lock(&gate);
                    if matches!(*state, State::ShutDown) {
                        break;
                    }
                    submit_due_flushes(&partitions, &execution)
                };
                let written = collect(pending).await;
                flushed.fetch_add(written as u64, Ordering::SeqCst);
            }
            tracing::debug!("Store worker stopped");
        }));
        tracing::debug!("Store worker started with period {:?}", self.period);
    }

    /// Writes every due entry right now, returns how many were written.
    pub async fn flush_now(&self) -> usize {
        let pending = submit_due_flushes(&self.partitions, &self.execution);
        let written = collect(pending).await;
        self.flushed.fetch_add(written as u64, Ordering::SeqCst);
        written
    }

    /// Entries written by this worker since start.
    pub fn flushed_count(&self) -> u64 {
        self.flushed.load(Ordering::SeqCst)
    }

    pub fn on_shutdown(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), State::ShutDown);
        if let State::Running(handle) = previous {
            handle.abort();
            tracing::debug!("Store worker shut down");
        }
    }
}

fn submit_due_flushes(
    partitions: &[PartitionContainer],
    execution: &ExecutionService,
) -> Vec<CompletionHandle<usize>> {
    let mut handles = Vec::new();
    for partition in partitions {
        let partition_id = partition.partition_id();
        for store in partition.record_stores() {
            if store.map_data_store().pending_operation_count() == 0 {
                continue;
            }
            handles.push(execution.submit_to_partition(partition_id, move || async move {
                match store.map_data_store().flush_due(now_ms()) {
                    Ok(written) => written,
                    Err(e) => {
                        tracing::warn!(
                            "Write-behind flush of map '{}' partition {} failed, will retry: {}",
                            store.name(),
                            partition_id,
                            e
                        );
                        0
                    }
                }
            }));
        }
    }
    handles
}

async fn collect(handles: Vec<CompletionHandle<usize>>) -> usize {
    let mut written = 0;
    for handle in handles {
        written += handle.join().await.unwrap_or(0);
    }
    if written > 0 {
        tracing::trace!("Store worker wrote {} entries", written);
    }
    written
}
