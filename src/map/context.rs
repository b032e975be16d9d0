//! Map Service Context
//!
//! The one value that wires the map service together: partition containers, the container
//! registry, execution, events, queries, expiration and the external collaborators.
//! Components receive what they need from here at construction; nothing is global.
//!
//! ## Lifecycle
//! - [`MapServiceContext::new`] allocates every partition container and starts the
//!   partition workers, the event dispatcher, the expiration sweep and the write-behind
//!   store worker.
//! - [`MapServiceContext::reset`] drops all data but keeps the service running.
//! - [`MapServiceContext::shutdown`] flushes write-behind data and stops everything.
//! - [`MapServiceContext::destroy_map`] tears down a single map.

use super::container::MapContainer;
use super::near_cache::{MapNearCacheManager, NearCacheManager};
use super::registry::MapContainerRegistry;
use super::stats::LocalMapStatsProvider;
use super::wan::WanEventCounters;
use crate::cluster::ownership::{OwnedPartitions, PartitionIdSet};
use crate::cluster::partition_table::{PartitionService, PartitionTable};
use crate::cluster::types::ClusterState;
use crate::config::{Config, IndexCopyBehavior, InMemoryFormat, Properties, Property};
use crate::event::service::EventService;
use crate::executor::service::ExecutionService;
use crate::executor::types::Completion;
use crate::expiration::manager::ExpirationManager;
use crate::expiration::task::ClearExpiredRecordsTask;
use crate::query::engine::{QueryEngine, QueryRunner};
use crate::storage::map_data_store::{MapStoreFactory, NoMapStoreFactory, NodeWideUsedCapacityCounter};
use crate::storage::partition_container::PartitionContainer;
use crate::storage::record_store::RecordStore;
use crate::storage::serialization::{SerializationService, ValueComparator};
use crate::storage::store_worker::StoreWorker;

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

pub const DESTROY_TIMEOUT: Duration = Duration::from_secs(30);

/// External services the map service consumes.
pub struct Collaborators {
    pub partition_service: Arc<dyn PartitionService>,
    pub map_store_factory: Arc<dyn MapStoreFactory>,
    pub near_cache_manager: Arc<dyn NearCacheManager>,
}

impl Collaborators {
    /// Local member owns every partition, no persistence, in-process near cache.
    pub fn single_node(partition_count: u32) -> Self {
        Self {
            partition_service: PartitionTable::single_node(partition_count),
            map_store_factory: Arc::new(NoMapStoreFactory),
            near_cache_manager: Arc::new(MapNearCacheManager::new()),
        }
    }

    pub fn with_map_store_factory(mut self, factory: Arc<dyn MapStoreFactory>) -> Self {
        self.map_store_factory = factory;
        self
    }

    pub fn with_near_cache_manager(mut self, manager: Arc<dyn NearCacheManager>) -> Self {
        self.near_cache_manager = manager;
        self
    }
}

/// What happened to the partitions of a destroyed map.
///
/// Destroy never fails; partitions listed here are the ones whose data may still be around.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestroyReport {
    pub map_name: String,
    /// Partitions that held a record store and dropped it.
    pub destroyed: Vec<u32>,
    /// Partitions that did not finish within the destroy timeout.
    pub timed_out: Vec<u32>,
    /// Partitions whose destroy operation can never report back.
    pub interrupted: Vec<u32>,
}

impl DestroyReport {
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.interrupted.is_empty()
    }
}

pub struct MapServiceContext {
    pub(crate) config: Config,
    pub(crate) properties: Arc<Properties>,
    pub(crate) ss: SerializationService,
    pub(crate) partition_service: Arc<dyn PartitionService>,
    pub(crate) owned_partitions: Arc<OwnedPartitions>,
    pub(crate) partitions: Arc<Vec<PartitionContainer>>,
    pub(crate) execution: Arc<ExecutionService>,
    pub(crate) registry: Arc<MapContainerRegistry>,
    pub(crate) events: Arc<EventService>,
    pub(crate) query_engine: QueryEngine,
    pub(crate) expiration: ExpirationManager,
    pub(crate) store_worker: StoreWorker,
    pub(crate) near_cache: Arc<dyn NearCacheManager>,
    pub(crate) stats: Arc<LocalMapStatsProvider>,
    pub(crate) wan_counters: WanEventCounters,
    pub(crate) node_wide_counter: Arc<NodeWideUsedCapacityCounter>,
    pub(crate) destroy_timeout: Duration,
}

impl MapServiceContext {
    /// Builds and starts the service. Must be called within a tokio runtime.
    pub fn new(config: Config, collaborators: Collaborators) -> Arc<Self> {
        Self::with_properties(config.properties(), config, collaborators)
    }

    pub fn with_properties(properties: Properties, config: Config, collaborators: Collaborators) -> Arc<Self> {
        let Collaborators {
            partition_service,
            map_store_factory,
            near_cache_manager,
        } = collaborators;
        let properties = Arc::new(properties);
        let ss = SerializationService;
        let partition_count = partition_service.partition_count();

        let partitions = Arc::new(init_partition_containers(partition_count));
        let execution = ExecutionService::new(
            partition_count,
            properties
                .get_integer(Property::PartitionOperationThreadCount)
                .max(1) as usize,
        );
        let owned_partitions = Arc::new(OwnedPartitions::new(partition_service.clone()));

        let registry = {
            let config = config.clone();
            Arc::new(MapContainerRegistry::new(move |name| {
                MapContainer::new(name, config.find_map_config(name), map_store_factory.as_ref())
            }))
        };
        let events = EventService::new(ss);
        let stats = Arc::new(LocalMapStatsProvider::new());

        let query_engine = QueryEngine::new(
            QueryRunner::from_properties(&properties, &execution, partitions.clone(), ss),
            owned_partitions.clone(),
        );

        let expiration = ExpirationManager::new(
            ClearExpiredRecordsTask {
                partitions: partitions.clone(),
                execution: execution.clone(),
                events: events.clone(),
                registry: registry.clone(),
                near_cache: near_cache_manager.clone(),
                stats: stats.clone(),
                cleanup_percentage: properties
                    .get_integer(Property::MapExpiryCleanupPercentage)
                    .clamp(0, 100) as u64,
                cleanup_min_count: properties
                    .get_integer(Property::MapExpiryCleanupMinCount)
                    .max(0) as usize,
            },
            Duration::from_secs(
                properties
                    .get_integer(Property::MapExpiryTaskPeriodSeconds)
                    .max(1) as u64,
            ),
        );

        let store_worker = StoreWorker::new(
            partitions.clone(),
            execution.clone(),
            Duration::from_millis(
                properties
                    .get_integer(Property::MapWriteBehindFlushPeriodMillis)
                    .max(1) as u64,
            ),
        );

        let destroy_timeout = Duration::from_millis(
            properties
                .get_integer(Property::MapDestroyTimeoutMillis)
                .max(0) as u64,
        );
        let node_wide_counter = NodeWideUsedCapacityCounter::new(
            properties.get_integer(Property::MapWriteBehindQueueCapacity),
        );

        let context = Arc::new(Self {
            config,
            properties,
            ss,
            partition_service,
            owned_partitions,
            partitions,
            execution,
            registry,
            events,
            query_engine,
            expiration,
            store_worker,
            near_cache: near_cache_manager,
            stats,
            wan_counters: WanEventCounters::new(),
            node_wide_counter,
            destroy_timeout,
        });
        context.expiration.start();
        context.store_worker.start();

        tracing::info!(
            "Map service started: {} partitions, {} owned locally",
            partition_count,
            context.owned_partitions.get().len()
        );
        context
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn serialization_service(&self) -> SerializationService {
        self.ss
    }

    pub fn partition_service(&self) -> &Arc<dyn PartitionService> {
        &self.partition_service
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Panics on an out-of-range id or the generic partition id.
    pub fn partition_container(&self, partition_id: u32) -> &PartitionContainer {
        assert!(
            (partition_id as usize) < self.partitions.len(),
            "partition {} out of range [0, {})",
            partition_id,
            self.partitions.len()
        );
        &self.partitions[partition_id as usize]
    }

    pub fn execution_service(&self) -> &Arc<ExecutionService> {
        &self.execution
    }

    pub fn event_service(&self) -> &Arc<EventService> {
        &self.events
    }

    pub fn expiration_manager(&self) -> &ExpirationManager {
        &self.expiration
    }

    pub fn store_worker(&self) -> &StoreWorker {
        &self.store_worker
    }

    pub fn stats(&self) -> &LocalMapStatsProvider {
        &self.stats
    }

    pub fn wan_event_counters(&self) -> &WanEventCounters {
        &self.wan_counters
    }

    pub fn near_cache_manager(&self) -> &Arc<dyn NearCacheManager> {
        &self.near_cache
    }

    pub fn node_wide_used_capacity_counter(&self) -> &Arc<NodeWideUsedCapacityCounter> {
        &self.node_wide_counter
    }

    // ------------------------------------------------------------------
    // Map containers
    // ------------------------------------------------------------------

    pub fn get_map_container(&self, map_name: &str) -> Arc<MapContainer> {
        self.registry.get_or_create(map_name)
    }

    pub fn get_existing_map_container(&self, map_name: &str) -> Option<Arc<MapContainer>> {
        self.registry.get(map_name)
    }

    pub fn remove_map_container(&self, container: &Arc<MapContainer>) -> bool {
        self.registry.remove(container)
    }

    pub fn map_container_registry(&self) -> &MapContainerRegistry {
        &self.registry
    }

    pub fn map_names(&self) -> Vec<String> {
        self.registry.names()
    }

    // ------------------------------------------------------------------
    // Record stores
    // ------------------------------------------------------------------

    pub fn get_record_store(&self, partition_id: u32, map_name: &str) -> Arc<RecordStore> {
        let container = self.get_map_container(map_name);
        self.partition_container(partition_id)
            .get_or_create_record_store(map_name, || {
                container.create_record_store(partition_id, self.ss, self.node_wide_counter.clone())
            })
    }

    pub fn get_existing_record_store(&self, partition_id: u32, map_name: &str) -> Option<Arc<RecordStore>> {
        self.partition_container(partition_id)
            .get_existing_record_store(map_name)
    }

    /// Clears and drops the matching record stores of one partition, e.g. after it migrated away.
    pub fn remove_record_stores_from_partition_matching_with<P>(
        &self,
        predicate: P,
        partition_id: u32,
        on_shutdown: bool,
        on_destroy: bool,
    ) -> usize
    where
        P: Fn(&RecordStore) -> bool,
    {
        self.partition_container(partition_id)
            .remove_matching(predicate, on_shutdown, on_destroy)
    }

    /// Releases transactional reservations of the matching record stores of one partition.
    pub fn remove_wbq_counters_from_matching_partitions_with<P>(&self, predicate: P, partition_id: u32)
    where
        P: Fn(&RecordStore) -> bool,
    {
        for store in self.partition_container(partition_id).record_stores() {
            if predicate(&store) {
                store
                    .map_data_store()
                    .reserved_capacity_counter()
                    .release_all_reservations();
            }
        }
    }

    fn remove_all_record_stores_of_all_maps(&self, on_shutdown: bool, on_destroy: bool) -> usize {
        (0..self.partition_count())
            .map(|partition_id| {
                self.remove_record_stores_from_partition_matching_with(
                    |_| true,
                    partition_id,
                    on_shutdown,
                    on_destroy,
                )
            })
            .sum()
    }

    // ------------------------------------------------------------------
    // Ownership & cluster state
    // ------------------------------------------------------------------

    pub fn owned_partitions(&self) -> Arc<PartitionIdSet> {
        self.owned_partitions.get()
    }

    pub fn reload_owned_partitions(&self) {
        self.owned_partitions.reload();
    }

    pub fn on_cluster_state_change(&self, state: ClusterState) {
        self.expiration.on_cluster_state_change(state);
    }

    // ------------------------------------------------------------------
    // Misc
    // ------------------------------------------------------------------

    pub fn index_copy_behavior(&self) -> IndexCopyBehavior {
        self.properties.get_enum(Property::IndexCopyBehavior)
    }

    pub fn value_comparator_of(&self, format: InMemoryFormat) -> ValueComparator {
        ValueComparator::of(format)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stops every map store context, then writes out all pending write-behind data.
    pub fn flush_maps(&self) {
        let containers = self.registry.containers();
        for container in &containers {
            container.map_store_context().stop();
        }

        for partition in self.partitions.iter() {
            for container in &containers {
                let Some(store) = partition.get_existing_record_store(container.name()) else {
                    continue;
                };
                if let Err(e) = store.map_data_store().hard_flush() {
                    tracing::error!(
                        "Failed to flush map '{}' partition {}: {}",
                        container.name(),
                        partition.partition_id(),
                        e
                    );
                }
            }
        }
        tracing::info!("Flushed {} maps", containers.len());
    }

    pub fn destroy_map_stores(&self) {
        for container in self.registry.containers() {
            if let Some(store) = container.map_store_context().map_store() {
                store.destroy();
            }
        }
    }

    /// Drops the data of every map. The service keeps running.
    pub fn reset(&self) {
        let removed = self.remove_all_record_stores_of_all_maps(false, false);
        self.near_cache.reset();
        tracing::info!("Map service reset, removed {} record stores", removed);
    }

    pub fn shutdown(&self) {
        self.store_worker.on_shutdown();
        let removed = self.remove_all_record_stores_of_all_maps(true, false);
        self.near_cache.shutdown();
        self.registry.clear();
        self.expiration.on_shutdown();
        self.events.shutdown();
        self.execution.shutdown();
        tracing::info!("Map service shut down, removed {} record stores", removed);
    }

    /// Tears down `map_name` on this node.
    ///
    /// The near cache and listeners go first, even without a local container: a member
    /// without partitions may still have both. Each partition drops its record store on its
    /// own worker; waiting is bounded per partition and a partition that does not finish in
    /// time is only reported.
    pub async fn destroy_map(&self, map_name: &str) -> DestroyReport {
        let mut report = DestroyReport {
            map_name: map_name.to_string(),
            ..DestroyReport::default()
        };

        self.near_cache.destroy_near_cache(map_name);
        self.events.deregister_all_listeners(map_name);

        let Some(container) = self.registry.get(map_name) else {
            tracing::debug!("No map container for '{}', nothing else to destroy", map_name);
            return report;
        };

        self.wan_counters.remove_counter(map_name);
        container.map_store_context().stop();
        self.stats.destroy_local_map_stats(map_name);

        let handles: Vec<_> = (0..self.partition_count())
            .map(|partition_id| {
                let partitions = self.partitions.clone();
                let name = map_name.to_string();
                self.execution.submit_to_partition(partition_id, move || async move {
                    partitions[partition_id as usize].destroy_map(&name)
                })
            })
            .collect();

        let timeout = self.destroy_timeout;
        let outcomes = join_all(handles.into_iter().map(|handle| async move {
            let partition_id = handle.partition_id();
            (partition_id, handle.await_completion(timeout).await)
        }))
        .await;

        for (partition_id, outcome) in outcomes {
            match outcome {
                Completion::Done(true) => report.destroyed.push(partition_id),
                Completion::Done(false) => {}
                Completion::TimedOut => {
                    tracing::warn!(
                        "Map '{}' partition {} was not destroyed within {:?}, possible leak",
                        map_name,
                        partition_id,
                        timeout
                    );
                    report.timed_out.push(partition_id);
                }
                Completion::Interrupted => {
                    tracing::warn!(
                        "Interrupted while destroying map '{}' partition {}",
                        map_name,
                        partition_id
                    );
                    report.interrupted.push(partition_id);
                }
            }
        }

        self.registry.remove(&container);
        tracing::info!(
            "Destroyed map '{}' ({} record stores, {} timed out)",
            map_name,
            report.destroyed.len(),
            report.timed_out.len()
        );
        report
    }
}

fn init_partition_containers(partition_count: u32) -> Vec<PartitionContainer> {
    (0..partition_count).map(PartitionContainer::new).collect()
}
