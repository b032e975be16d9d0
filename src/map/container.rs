use super::interceptor::InterceptorRegistry;
use crate::config::MapConfig;
use crate::query::extractors::Extractors;
use crate::storage::map_data_store::{MapStoreContext, MapStoreFactory, NodeWideUsedCapacityCounter};
use crate::storage::record::now_ms;
use crate::storage::record_store::RecordStore;
use crate::storage::serialization::SerializationService;

use std::sync::Arc;

/// Per-map metadata shared by all partitions of the map on this node.
///
/// The config is a snapshot taken at construction; later config changes only apply to a
/// container created after the map is destroyed.
pub struct MapContainer {
    name: String,
    config: MapConfig,
    interceptors: InterceptorRegistry,
    extractors: Arc<Extractors>,
    map_store_context: MapStoreContext,
    creation_time: u64,
}

impl MapContainer {
    pub fn new(name: &str, config: MapConfig, map_store_factory: &dyn MapStoreFactory) -> Self {
        let map_store_context = MapStoreContext::new(name, config.map_store.clone(), map_store_factory);
        let extractors = Arc::new(Extractors::new(config.attributes.clone()));
        tracing::debug!(
            "Created map container '{}' (format={:?}, map store={})",
            name,
            config.in_memory_format,
            map_store_context.is_map_store_enabled()
        );
        Self {
            name: name.to_string(),
            config,
            interceptors: InterceptorRegistry::new(),
            extractors,
            map_store_context,
            creation_time: now_ms(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.interceptors
    }

    pub fn extractors(&self) -> Arc<Extractors> {
        self.extractors.clone()
    }

    pub fn map_store_context(&self) -> &MapStoreContext {
        &self.map_store_context
    }

    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    pub fn create_record_store(
        &self,
        partition_id: u32,
        ss: SerializationService,
        node_wide: Arc<NodeWideUsedCapacityCounter>,
    ) -> RecordStore {
        RecordStore::new(
            &self.name,
            partition_id,
            &self.config,
            self.map_store_context.new_data_store(ss, node_wide),
        )
    }
}
