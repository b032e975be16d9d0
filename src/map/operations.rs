//! Partition-bound map operations.
//!
//! Every operation is routed to the worker owning the key's partition and runs there to
//! completion, so mutations of one partition never interleave. Interceptors see
//! application values; the record store only ever sees wire values.

use super::context::MapServiceContext;
use super::container::MapContainer;
use super::interceptor::MapInterceptor;
use super::stats::OperationKind;
use crate::cluster::types::NodeId;
use crate::error::{MapError, MapResult};
use crate::event::filter::EventFilter;
use crate::event::listener::EntryListener;
use crate::event::types::{EntryEventType, MapPartitionLostEvent};
use crate::query::result::QueryOutcome;
use crate::query::{Query, Target};
use crate::storage::record::now_ms;
use crate::storage::serialization::{Data, Value};

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

impl MapServiceContext {
    /// Stores `value` and returns the previous value.
    pub async fn put(
        self: &Arc<Self>,
        map_name: &str,
        key: Value,
        value: Value,
        ttl: Option<Duration>,
    ) -> MapResult<Option<Value>> {
        self.put_internal(map_name, key, value, ttl, OperationKind::Put)
            .await
    }

    /// Like [`put`](Self::put) without handing back the previous value.
    pub async fn set(self: &Arc<Self>, map_name: &str, key: Value, value: Value) -> MapResult<()> {
        self.put_internal(map_name, key, value, None, OperationKind::Set)
            .await
            .map(|_| ())
    }

    async fn put_internal(
        self: &Arc<Self>,
        map_name: &str,
        key: Value,
        value: Value,
        ttl: Option<Duration>,
        kind: OperationKind,
    ) -> MapResult<Option<Value>> {
        let started = Instant::now();
        let key_data = self.ss.to_data(&key)?;
        let partition_id = self.partition_service.partition_id_of(&key_data);

        let context = self.clone();
        let name = map_name.to_string();
        let old = self
            .execution
            .run_on_partition(partition_id, move || async move {
                context.put_on_partition(&name, partition_id, key_data, value, ttl)
            })
            .await??;

        self.record_latency(map_name, kind, started);
        Ok(old)
    }

    fn put_on_partition(
        &self,
        map_name: &str,
        partition_id: u32,
        key: Data,
        value: Value,
        ttl: Option<Duration>,
    ) -> MapResult<Option<Value>> {
        let container = self.get_map_container(map_name);
        let store = self.get_record_store(partition_id, map_name);
        let now = now_ms();

        let old_data = store.get(&key, now).map_err(MapError::MapStore)?;
        let old = old_data
            .as_ref()
            .map(|data| self.ss.to_object(data))
            .transpose()?;
        let value = container.interceptors().intercept_put(old.as_ref(), value);
        let new_data = self.ss.to_data(&value)?;

        store
            .put(key.clone(), new_data.clone(), ttl, now)
            .map_err(MapError::MapStore)?;

        let event_type = if old_data.is_some() {
            EntryEventType::Updated
        } else {
            EntryEventType::Added
        };
        self.after_mutation(&container, partition_id, event_type, &key, old_data.as_ref(), Some(&new_data));
        container.interceptors().after_put(&value);
        Ok(old)
    }

    pub async fn get(self: &Arc<Self>, map_name: &str, key: Value) -> MapResult<Option<Value>> {
        let started = Instant::now();
        let key_data = self.ss.to_data(&key)?;

        if let Some(cached) = self.near_cache.get(map_name, &key_data) {
            tracing::trace!("Near cache hit on map '{}'", map_name);
            if let Some(stats) = self.stats.get(map_name) {
                stats.increment_hits();
            }
            let container = self.get_map_container(map_name);
            let value = container
                .interceptors()
                .intercept_get(Some(self.ss.to_object(&cached)?));
            container.interceptors().after_get(value.as_ref());
            self.record_latency(map_name, OperationKind::Get, started);
            return Ok(value);
        }

        let partition_id = self.partition_service.partition_id_of(&key_data);
        let context = self.clone();
        let name = map_name.to_string();
        let value = self
            .execution
            .run_on_partition(partition_id, move || async move {
                context.get_on_partition(&name, partition_id, key_data)
            })
            .await??;

        self.record_latency(map_name, OperationKind::Get, started);
        Ok(value)
    }

    fn get_on_partition(&self, map_name: &str, partition_id: u32, key: Data) -> MapResult<Option<Value>> {
        let container = self.get_map_container(map_name);
        let store = self.get_record_store(partition_id, map_name);

        let data = store.get(&key, now_ms()).map_err(MapError::MapStore)?;
        if let Some(data) = &data {
            if let Some(stats) = self.stats_of(&container) {
                stats.increment_hits();
            }
            if container.config().near_cache_enabled {
                self.near_cache.put(map_name, key, data.clone());
            }
        }

        let value = data.as_ref().map(|d| self.ss.to_object(d)).transpose()?;
        let value = container.interceptors().intercept_get(value);
        container.interceptors().after_get(value.as_ref());
        Ok(value)
    }

    /// Removes the entry and returns the removed value.
    pub async fn remove(self: &Arc<Self>, map_name: &str, key: Value) -> MapResult<Option<Value>> {
        let started = Instant::now();
        let key_data = self.ss.to_data(&key)?;
        let partition_id = self.partition_service.partition_id_of(&key_data);

        let context = self.clone();
        let name = map_name.to_string();
        let removed = self
            .execution
            .run_on_partition(partition_id, move || async move {
                context.remove_on_partition(&name, partition_id, key_data)
            })
            .await??;

        self.record_latency(map_name, OperationKind::Remove, started);
        Ok(removed)
    }

    fn remove_on_partition(&self, map_name: &str, partition_id: u32, key: Data) -> MapResult<Option<Value>> {
        let container = self.get_map_container(map_name);
        let store = self.get_record_store(partition_id, map_name);

        let removed_data = store.remove(&key, now_ms()).map_err(MapError::MapStore)?;
        let removed = removed_data
            .as_ref()
            .map(|data| self.ss.to_object(data))
            .transpose()?;
        let removed = container.interceptors().intercept_remove(removed);

        if removed_data.is_some() {
            self.after_mutation(
                &container,
                partition_id,
                EntryEventType::Removed,
                &key,
                removed_data.as_ref(),
                None,
            );
        }
        container.interceptors().after_remove(removed.as_ref());
        Ok(removed)
    }

    pub async fn contains_key(self: &Arc<Self>, map_name: &str, key: Value) -> MapResult<bool> {
        let key_data = self.ss.to_data(&key)?;
        let partition_id = self.partition_service.partition_id_of(&key_data);
        let context = self.clone();
        let name = map_name.to_string();
        self.execution
            .run_on_partition(partition_id, move || async move {
                context
                    .get_existing_record_store(partition_id, &name)
                    .is_some_and(|store| store.contains_key(&key_data, now_ms()))
            })
            .await
    }

    /// Number of entries held by the partitions this node owns.
    pub async fn size(self: &Arc<Self>, map_name: &str) -> MapResult<usize> {
        let handles: Vec<_> = self
            .owned_partitions()
            .iter()
            .map(|partition_id| {
                let context = self.clone();
                let name = map_name.to_string();
                self.execution.submit_to_partition(partition_id, move || async move {
                    context
                        .get_existing_record_store(partition_id, &name)
                        .map(|store| store.size())
                        .unwrap_or(0)
                })
            })
            .collect();

        let mut total = 0;
        for (partition_id, size) in join_all(handles.into_iter().map(|handle| async move {
            (handle.partition_id(), handle.join().await)
        }))
        .await
        {
            total += size
                .ok_or_else(|| MapError::ExecutorShutdown(format!("partition-{}", partition_id)))?;
        }
        Ok(total)
    }

    /// Writes out pending write-behind entries of `map_name`, returns how many were written.
    pub async fn flush(self: &Arc<Self>, map_name: &str) -> MapResult<usize> {
        let handles: Vec<_> = (0..self.partition_count())
            .filter(|partition_id| {
                self.get_existing_record_store(*partition_id, map_name)
                    .is_some()
            })
            .map(|partition_id| {
                let context = self.clone();
                let name = map_name.to_string();
                self.execution.submit_to_partition(partition_id, move || async move {
                    match context.get_existing_record_store(partition_id, &name) {
                        Some(store) => store.map_data_store().hard_flush(),
                        None => Ok(0),
                    }
                })
            })
            .collect();

        let mut flushed = 0;
        for handle in handles {
            let partition_id = handle.partition_id();
            flushed += handle
                .join()
                .await
                .ok_or_else(|| MapError::ExecutorShutdown(format!("partition-{}", partition_id)))?
                .map_err(MapError::MapStore)?;
        }
        tracing::debug!("Flushed {} entries of map '{}'", flushed, map_name);
        Ok(flushed)
    }

    pub async fn query(&self, query: Query, target: Target) -> MapResult<QueryOutcome> {
        let extractors = self.get_map_container(&query.map_name).extractors();
        self.query_engine.execute(query, extractors, target).await
    }

    // ------------------------------------------------------------------
    // Interceptors & listeners
    // ------------------------------------------------------------------

    /// Returns `false` if `id` is already registered on the map.
    pub fn add_interceptor(&self, map_name: &str, id: &str, interceptor: Arc<dyn MapInterceptor>) -> bool {
        self.get_map_container(map_name)
            .interceptors()
            .register(id, interceptor)
    }

    pub fn remove_interceptor(&self, map_name: &str, id: &str) -> bool {
        self.get_existing_map_container(map_name)
            .is_some_and(|container| container.interceptors().deregister(id))
    }

    pub fn add_entry_listener(&self, map_name: &str, listener: EntryListener, filter: EventFilter) -> Uuid {
        self.events.add_entry_listener(map_name, listener, filter)
    }

    pub fn add_local_entry_listener(&self, map_name: &str, listener: EntryListener, filter: EventFilter) -> Uuid {
        self.events.add_local_entry_listener(map_name, listener, filter)
    }

    pub fn add_partition_lost_listener<F>(&self, map_name: &str, callback: F) -> Uuid
    where
        F: Fn(&MapPartitionLostEvent) + Send + Sync + 'static,
    {
        self.events.add_partition_lost_listener(map_name, callback)
    }

    pub fn remove_listener(&self, map_name: &str, id: Uuid) -> bool {
        self.events.deregister_listener(map_name, id)
    }

    /// Tells every map's partition-lost listeners that `partition_id` lost its data.
    pub fn on_partition_lost(&self, partition_id: u32, member: Option<NodeId>) {
        for map_name in self.map_names() {
            self.events
                .publish_partition_lost(&map_name, partition_id, member.clone());
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn after_mutation(
        &self,
        container: &MapContainer,
        partition_id: u32,
        event_type: EntryEventType,
        key: &Data,
        old_value: Option<&Data>,
        new_value: Option<&Data>,
    ) {
        let map_name = container.name();
        self.near_cache.invalidate(map_name, key);
        self.wan_counters.increment(map_name);
        self.events.publish_entry_event(
            map_name,
            event_type,
            partition_id,
            key,
            old_value,
            new_value,
            &container.extractors(),
        );
    }

    fn stats_of(&self, container: &MapContainer) -> Option<Arc<super::stats::LocalMapStats>> {
        container
            .config()
            .statistics_enabled
            .then(|| self.stats.get_or_create(container.name()))
    }

    fn record_latency(&self, map_name: &str, kind: OperationKind, started: Instant) {
        if let Some(container) = self.get_existing_map_container(map_name) {
            if let Some(stats) = self.stats_of(&container) {
                stats.record(kind, started.elapsed());
            }
        }
    }
}
