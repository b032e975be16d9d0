//! Near cache boundary.
//!
//! The map service only drives the near cache lifecycle: it invalidates keys on mutation, and
//! destroys, resets or shuts the caches down together with the maps.

use crate::storage::serialization::Data;

use dashmap::DashMap;

pub trait NearCacheManager: Send + Sync {
    /// Returns `true` when a cache existed for the map.
    fn destroy_near_cache(&self, map_name: &str) -> bool;

    fn invalidate(&self, map_name: &str, key: &Data);

    fn get(&self, _map_name: &str, _key: &Data) -> Option<Data> {
        None
    }

    fn put(&self, _map_name: &str, _key: Data, _value: Data) {}

    fn reset(&self);

    fn shutdown(&self);
}

/// In-process near cache of wire values, one cache per map.
#[derive(Default)]
pub struct MapNearCacheManager {
    caches: DashMap<String, DashMap<Data, Data>>,
}

impl MapNearCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_entries(&self, map_name: &str) -> usize {
        self.caches.get(map_name).map(|cache| cache.len()).unwrap_or(0)
    }
}

impl NearCacheManager for MapNearCacheManager {
    fn destroy_near_cache(&self, map_name: &str) -> bool {
        self.caches.remove(map_name).is_some()
    }

    fn invalidate(&self, map_name: &str, key: &Data) {
        if let Some(cache) = self.caches.get(map_name) {
            cache.remove(key);
        }
    }

    fn get(&self, map_name: &str, key: &Data) -> Option<Data> {
        self.caches
            .get(map_name)
            .and_then(|cache| cache.get(key).map(|value| value.clone()))
    }

    fn put(&self, map_name: &str, key: Data, value: Data) {
        self.caches
            .entry(map_name.to_string())
            .or_default()
            .insert(key, value);
    }

    fn reset(&self) {
        for cache in self.caches.iter() {
            cache.value().clear();
        }
    }

    fn shutdown(&self) {
        self.caches.clear();
    }
}
