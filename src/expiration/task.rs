use crate::event::service::EventService;
use crate::event::types::EntryEventType;
use crate::executor::service::ExecutionService;
use crate::executor::types::CompletionHandle;
use crate::map::near_cache::NearCacheManager;
use crate::map::registry::MapContainerRegistry;
use crate::map::stats::LocalMapStatsProvider;
use crate::query::extractors::Extractors;
use crate::storage::partition_container::PartitionContainer;
use crate::storage::record::now_ms;

use rand::Rng;
use std::sync::Arc;

/// One sweep over every partition container.
///
/// Eviction itself runs on the partition's worker, like any other mutation. Each sweep
/// evicts at most `cleanup_percentage` percent of a store's entries, but never fewer than
/// `cleanup_min_count`.
pub struct ClearExpiredRecordsTask {
    pub(crate) partitions: Arc<Vec<PartitionContainer>>,
    pub(crate) execution: Arc<ExecutionService>,
    pub(crate) events: Arc<EventService>,
    pub(crate) registry: Arc<MapContainerRegistry>,
    pub(crate) near_cache: Arc<dyn NearCacheManager>,
    pub(crate) stats: Arc<LocalMapStatsProvider>,
    pub(crate) cleanup_percentage: u64,
    pub(crate) cleanup_min_count: usize,
}

impl ClearExpiredRecordsTask {
    fn max_evictions(&self, size: usize) -> usize {
        let by_percentage = (size as u64 * self.cleanup_percentage / 100) as usize;
        by_percentage.max(self.cleanup_min_count)
    }

    /// Runs a sweep and returns the number of evicted records.
    pub async fn run(&self) -> usize {
        Self::collect(self.submit()).await
    }

    /// Queues the eviction of every expirable store on its partition's worker.
    pub fn submit(&self) -> Vec<CompletionHandle<usize>> {
        let partition_count = self.partitions.len();
        if partition_count == 0 {
            return Vec::new();
        }
        // Start somewhere random so no partition is always swept last.
        let start = rand::thread_rng().gen_range(0..partition_count);

        let mut handles = Vec::new();
        for offset in 0..partition_count {
            let partition_id = ((start + offset) % partition_count) as u32;
            for store in self.partitions[partition_id as usize].record_stores() {
                if store.is_empty() || !store.has_expirable_entries() {
                    continue;
                }
                let max = self.max_evictions(store.size());
                let map_name = store.name().to_string();
                let extractors = self
                    .registry
                    .get(&map_name)
                    .map(|container| container.extractors())
                    .unwrap_or_else(|| Arc::new(Extractors::default()));
                let events = self.events.clone();
                let near_cache = self.near_cache.clone();
                let stats = self.stats.get(&map_name);

                handles.push(self.execution.submit_to_partition(partition_id, move || async move {
                    let expired = store.evict_expired(now_ms(), max);
                    for (key, value) in &expired {
                        near_cache.invalidate(&map_name, key);
                        events.publish_entry_event(
                            &map_name,
                            EntryEventType::Expired,
                            partition_id,
                            key,
                            Some(value),
                            None,
                            &extractors,
                        );
                    }
                    if let Some(stats) = stats {
                        stats.increment_expirations(expired.len() as u64);
                    }
                    expired.len()
                }));
            }
        }

        handles
    }

    /// Waits for the evictions queued by [`submit`](Self::submit).
    pub async fn collect(handles: Vec<CompletionHandle<usize>>) -> usize {
        let mut evicted = 0;
        for handle in handles {
            evicted += handle.join().await.unwrap_or(0);
        }
        if evicted > 0 {
            tracing::debug!("Expiration sweep evicted {} records", evicted);
        }
        evicted
    }
}
