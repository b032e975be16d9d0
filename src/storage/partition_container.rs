use super::record_store::RecordStore;

use dashmap::DashMap;
use std::sync::Arc;

/// The record stores of a single partition, keyed by map name.
pub struct PartitionContainer {
    partition_id: u32,
    maps: DashMap<String, Arc<RecordStore>>,
}

impl PartitionContainer {
    pub fn new(partition_id: u32) -> Self {
        Self {
            partition_id,
            maps: DashMap::new(),
        }
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    pub fn get_or_create_record_store<F>(&self, map_name: &str, create: F) -> Arc<RecordStore>
    where
        F: FnOnce() -> RecordStore,
    {
        if let Some(store) = self.maps.get(map_name) {
            return store.clone();
        }
        self.maps
            .entry(map_name.to_string())
            .or_insert_with(|| {
                tracing::trace!(
                    "Creating record store for '{}' on partition {}",
                    map_name,
                    self.partition_id
                );
                Arc::new(create())
            })
            .clone()
    }

    pub fn get_existing_record_store(&self, map_name: &str) -> Option<Arc<RecordStore>> {
        self.maps.get(map_name).map(|store| store.clone())
    }

    pub fn record_stores(&self) -> Vec<Arc<RecordStore>> {
        self.maps.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn map_names(&self) -> Vec<String> {
        self.maps.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes and destroys the record store of `map_name`, if present.
    pub fn destroy_map(&self, map_name: &str) -> bool {
        match self.maps.remove(map_name) {
            Some((_, store)) => {
                store.destroy();
                true
            }
            None => false,
        }
    }

    /// Clears and removes every record store matching `predicate`.
    pub fn remove_matching<P>(&self, predicate: P, on_shutdown: bool, on_destroy: bool) -> usize
    where
        P: Fn(&RecordStore) -> bool,
    {
        let matching: Vec<String> = self
            .maps
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for name in matching {
            if let Some((_, store)) = self.maps.remove(&name) {
                store.clear_partition(on_shutdown, on_destroy);
                removed += 1;
            }
        }
        removed
    }
}
