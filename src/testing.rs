//! Test doubles shared by the module tests.

use crate::map::near_cache::NearCacheManager;
use crate::storage::map_data_store::{MapStore, MapStoreFactory};
use crate::storage::serialization::Value;

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory map store that records what it was asked to do.
#[derive(Default)]
pub struct RecordingMapStore {
    pub entries: DashMap<String, Value>,
    pub stores: AtomicUsize,
    pub deletes: AtomicUsize,
    pub loads: AtomicUsize,
    pub destroyed: AtomicUsize,
    /// While set, stores and deletes fail.
    pub unavailable: AtomicBool,
}

impl RecordingMapStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries.get(&key.to_string()).map(|v| v.clone())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("map store unavailable");
        }
        Ok(())
    }
}

impl MapStore for RecordingMapStore {
    fn load(&self, key: &Value) -> Result<Option<Value>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(key))
    }

    fn store(&self, key: &Value, value: &Value) -> Result<()> {
        self.check_available()?;
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &Value) -> Result<()> {
        self.check_available()?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(&key.to_string());
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the same store for every map and counts how often it was asked.
pub struct SharedStoreFactory {
    pub store: Arc<RecordingMapStore>,
    pub created: AtomicUsize,
}

impl SharedStoreFactory {
    pub fn new(store: Arc<RecordingMapStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            created: AtomicUsize::new(0),
        })
    }
}

impl MapStoreFactory for SharedStoreFactory {
    fn new_map_store(&self, _map_name: &str) -> Option<Arc<dyn MapStore>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Some(self.store.clone())
    }
}

/// Near cache manager that only counts lifecycle calls.
#[derive(Default)]
pub struct CountingNearCacheManager {
    pub destroyed: DashMap<String, usize>,
    pub resets: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl CountingNearCacheManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn destroy_count(&self, map_name: &str) -> usize {
        self.destroyed.get(map_name).map(|c| *c).unwrap_or(0)
    }
}

impl NearCacheManager for CountingNearCacheManager {
    fn destroy_near_cache(&self, map_name: &str) -> bool {
        *self.destroyed.entry(map_name.to_string()).or_insert(0) += 1;
        true
    }

    fn invalidate(&self, _map_name: &str, _key: &crate::storage::serialization::Data) {}

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
