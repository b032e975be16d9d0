//! Map Container Registry
//!
//! At most one [`MapContainer`] per map name. The first access constructs it while holding a
//! per-name lock, so concurrent first accesses all end up with the same instance and the
//! constructor runs once. Lookups of an existing container never lock.

use super::container::MapContainer;

use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type Constructor = Box<dyn Fn(&str) -> MapContainer + Send + Sync>;

pub struct MapContainerRegistry {
    containers: DashMap<String, Arc<MapContainer>>,
    mutexes: ContextMutexFactory,
    constructor: Constructor,
}

impl MapContainerRegistry {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn(&str) -> MapContainer + Send + Sync + 'static,
    {
        Self {
            containers: DashMap::new(),
            mutexes: ContextMutexFactory::default(),
            constructor: Box::new(constructor),
        }
    }

    pub fn get_or_create(&self, map_name: &str) -> Arc<MapContainer> {
        if let Some(container) = self.get(map_name) {
            return container;
        }

        let mutex = self.mutexes.mutex_for(map_name);
        let _guard = mutex.lock();
        if let Some(container) = self.get(map_name) {
            return container;
        }

        let container = Arc::new((self.constructor)(map_name));
        self.containers
            .insert(map_name.to_string(), container.clone());
        container
    }

    pub fn get(&self, map_name: &str) -> Option<Arc<MapContainer>> {
        self.containers.get(map_name).map(|c| c.clone())
    }

    /// Removes `container` only if it is still the registered instance for its name.
    pub fn remove(&self, container: &Arc<MapContainer>) -> bool {
        let removed = self
            .containers
            .remove_if(container.name(), |_, current| Arc::ptr_eq(current, container))
            .is_some();
        if removed {
            tracing::debug!("Removed map container '{}'", container.name());
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        self.containers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn containers(&self) -> Vec<Arc<MapContainer>> {
        self.containers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn clear(&self) {
        self.containers.clear();
    }

    pub(crate) fn pending_mutexes(&self) -> usize {
        self.mutexes.len()
    }
}

/// Reference-counted locks keyed by name. A lock lives only while someone holds it.
#[derive(Default)]
pub struct ContextMutexFactory {
    mutexes: DashMap<String, Arc<Mutex<()>>>,
}

impl ContextMutexFactory {
    pub fn mutex_for(&self, key: &str) -> ContextMutex<'_> {
        let mutex = self
            .mutexes
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ContextMutex {
            factory: self,
            key: key.to_string(),
            mutex,
        }
    }

    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }
}

pub struct ContextMutex<'a> {
    factory: &'a ContextMutexFactory,
    key: String,
    mutex: Arc<Mutex<()>>,
}

impl ContextMutex<'_> {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ContextMutex<'_> {
    fn drop(&mut self) {
        // Ours plus the map's: nobody else is waiting on this lock.
        self.factory
            .mutexes
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 2);
    }
}
