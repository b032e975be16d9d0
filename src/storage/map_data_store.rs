//! Persistence adapter between a record store and an external map store.
//!
//! A [`MapStore`] is the user's backing store (database, file, service) and is out of this
//! crate's hands. Each record store talks to it through a [`MapDataStore`]:
//!
//! - [`EmptyMapDataStore`]: no map store configured.
//! - [`WriteThroughStore`]: every mutation is written synchronously.
//! - [`WriteBehindStore`]: mutations are queued and written once they are older than the
//!   configured write delay, or on [`MapDataStore::hard_flush`]. Due entries are written
//!   on the next mutation or by the periodic store worker, whichever comes first. Failed
//!   writes stay queued and are retried.
//!
//! Queued writes and transactional reservations count against the node-wide
//! [`NodeWideUsedCapacityCounter`].

use super::serialization::{Data, SerializationService, Value};
use crate::config::MapStoreConfig;

use anyhow::Result;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// User-provided persistent store.
pub trait MapStore: Send + Sync {
    fn load(&self, key: &Value) -> Result<Option<Value>>;

    fn store(&self, key: &Value, value: &Value) -> Result<()>;

    fn store_all(&self, entries: &[(Value, Value)]) -> Result<()> {
        for (key, value) in entries {
            self.store(key, value)?;
        }
        Ok(())
    }

    fn delete(&self, key: &Value) -> Result<()>;

    /// Releases the store's resources. Called when map stores are torn down.
    fn destroy(&self) {}
}

/// Creates the map store for a map, if that map has one.
pub trait MapStoreFactory: Send + Sync {
    fn new_map_store(&self, map_name: &str) -> Option<Arc<dyn MapStore>>;
}

/// Factory for deployments without persistence.
pub struct NoMapStoreFactory;

impl MapStoreFactory for NoMapStoreFactory {
    fn new_map_store(&self, _map_name: &str) -> Option<Arc<dyn MapStore>> {
        None
    }
}

/// Bounds the number of queued write-behind entries and reservations on this node.
#[derive(Debug)]
pub struct NodeWideUsedCapacityCounter {
    max_capacity: i64,
    used: AtomicI64,
}

impl NodeWideUsedCapacityCounter {
    pub fn new(max_capacity: i64) -> Arc<Self> {
        Arc::new(Self {
            max_capacity,
            used: AtomicI64::new(0),
        })
    }

    /// Adds `delta` unless that would exceed the maximum. Negative deltas always apply.
    pub fn check_and_add(&self, delta: i64) -> bool {
        if delta <= 0 {
            self.used.fetch_add(delta, Ordering::SeqCst);
            return true;
        }
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used + delta <= self.max_capacity).then_some(used + delta)
            })
            .is_ok()
    }

    pub fn used(&self) -> i64 {
        self.used.load(Ordering::SeqCst)
    }
}

/// Capacity reserved by in-flight transactions of one record store.
#[derive(Debug)]
pub struct ReservedCapacityCounter {
    node_wide: Arc<NodeWideUsedCapacityCounter>,
    reservations: DashMap<Uuid, i64>,
}

impl ReservedCapacityCounter {
    pub fn new(node_wide: Arc<NodeWideUsedCapacityCounter>) -> Self {
        Self {
            node_wide,
            reservations: DashMap::new(),
        }
    }

    pub fn reserve(&self, txn_id: Uuid) -> bool {
        if !self.node_wide.check_and_add(1) {
            return false;
        }
        *self.reservations.entry(txn_id).or_insert(0) += 1;
        true
    }

    pub fn release(&self, txn_id: Uuid) {
        if let Some((_, count)) = self.reservations.remove(&txn_id) {
            self.node_wide.check_and_add(-count);
        }
    }

    pub fn release_all_reservations(&self) {
        let total: i64 = self.reservations.iter().map(|entry| *entry.value()).sum();
        self.reservations.clear();
        if total > 0 {
            self.node_wide.check_and_add(-total);
            tracing::debug!("Released {} reserved write-behind slots", total);
        }
    }

    pub fn reserved(&self) -> i64 {
        self.reservations.iter().map(|entry| *entry.value()).sum()
    }
}

/// Per-map persistence context, owned by the map container.
pub struct MapStoreContext {
    map_name: String,
    config: MapStoreConfig,
    store: Option<Arc<dyn MapStore>>,
    stopped: Arc<AtomicBool>,
}

impl MapStoreContext {
    pub fn new(map_name: &str, config: MapStoreConfig, factory: &dyn MapStoreFactory) -> Self {
        let store = if config.enabled {
            factory.new_map_store(map_name)
        } else {
            None
        };
        if config.enabled && store.is_none() {
            tracing::warn!(
                "Map store enabled for '{}' but the factory provided none",
                map_name
            );
        }
        Self {
            map_name: map_name.to_string(),
            config,
            store,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_map_store_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn map_store(&self) -> Option<&Arc<dyn MapStore>> {
        self.store.as_ref()
    }

    /// Stops background write-behind. Queued entries are kept until hard flush or destroy.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) && self.store.is_some() {
            tracing::debug!("Stopped map store context of '{}'", self.map_name);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn new_data_store(
        &self,
        ss: SerializationService,
        node_wide: Arc<NodeWideUsedCapacityCounter>,
    ) -> Box<dyn MapDataStore> {
        let reserved = ReservedCapacityCounter::new(node_wide.clone());
        match &self.store {
            None => Box::new(EmptyMapDataStore { reserved }),
            Some(store) if self.config.is_write_behind() => Box::new(WriteBehindStore {
                store: store.clone(),
                ss,
                write_delay_millis: self.config.write_delay_seconds.saturating_mul(1000),
                stopped: self.stopped.clone(),
                queue: Mutex::new(VecDeque::new()),
                node_wide,
                reserved,
            }),
            Some(store) => Box::new(WriteThroughStore {
                store: store.clone(),
                ss,
                reserved,
            }),
        }
    }
}

/// What a record store sees of persistence.
pub trait MapDataStore: Send + Sync {
    fn add(&self, key: &Data, value: &Data, now: u64) -> Result<()>;

    fn remove(&self, key: &Data, now: u64) -> Result<()>;

    /// Read-through on a miss.
    fn load(&self, key: &Data) -> Result<Option<Data>>;

    /// Writes everything pending, returns the number of flushed entries.
    fn hard_flush(&self) -> Result<usize>;

    /// Writes the pending entries whose write delay has elapsed by `now`.
    /// Does nothing once the map store context is stopped.
    fn flush_due(&self, _now: u64) -> Result<usize> {
        Ok(0)
    }

    fn pending_operation_count(&self) -> usize;

    /// Discards pending work without writing it.
    fn reset(&self);

    fn reserved_capacity_counter(&self) -> &ReservedCapacityCounter;
}

pub struct EmptyMapDataStore {
    reserved: ReservedCapacityCounter,
}

impl EmptyMapDataStore {
    pub fn new(node_wide: Arc<NodeWideUsedCapacityCounter>) -> Self {
        Self {
            reserved: ReservedCapacityCounter::new(node_wide),
        }
    }
}

impl MapDataStore for EmptyMapDataStore {
    fn add(&self, _key: &Data, _value: &Data, _now: u64) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &Data, _now: u64) -> Result<()> {
        Ok(())
    }

    fn load(&self, _key: &Data) -> Result<Option<Data>> {
        Ok(None)
    }

    fn hard_flush(&self) -> Result<usize> {
        Ok(0)
    }

    fn pending_operation_count(&self) -> usize {
        0
    }

    fn reset(&self) {}

    fn reserved_capacity_counter(&self) -> &ReservedCapacityCounter {
        &self.reserved
    }
}

pub struct WriteThroughStore {
    store: Arc<dyn MapStore>,
    ss: SerializationService,
    reserved: ReservedCapacityCounter,
}

impl MapDataStore for WriteThroughStore {
    fn add(&self, key: &Data, value: &Data, _now: u64) -> Result<()> {
        self.store
            .store(&self.ss.to_object(key)?, &self.ss.to_object(value)?)
    }

    fn remove(&self, key: &Data, _now: u64) -> Result<()> {
        self.store.delete(&self.ss.to_object(key)?)
    }

    fn load(&self, key: &Data) -> Result<Option<Data>> {
        match self.store.load(&self.ss.to_object(key)?)? {
            Some(value) => Ok(Some(self.ss.to_data(&value)?)),
            None => Ok(None),
        }
    }

    fn hard_flush(&self) -> Result<usize> {
        Ok(0)
    }

    fn pending_operation_count(&self) -> usize {
        0
    }

    fn reset(&self) {}

    fn reserved_capacity_counter(&self) -> &ReservedCapacityCounter {
        &self.reserved
    }
}

#[derive(Debug, Clone)]
struct DelayedEntry {
    key: Data,
    /// `None` is a queued delete.
    value: Option<Data>,
    store_time: u64,
}

pub struct WriteBehindStore {
    store: Arc<dyn MapStore>,
    ss: SerializationService,
    write_delay_millis: u64,
    stopped: Arc<AtomicBool>,
    queue: Mutex<VecDeque<DelayedEntry>>,
    node_wide: Arc<NodeWideUsedCapacityCounter>,
    reserved: ReservedCapacityCounter,
}

impl WriteBehindStore {
    /// Queues `entry`, then opportunistically writes whatever is due.
    ///
    /// A failing backlog write is retried later and never fails the mutation that
    /// triggered it.
    fn enqueue(&self, entry: DelayedEntry) -> Result<()> {
        if !self.node_wide.check_and_add(1) {
            anyhow::bail!("write-behind queue reached the node-wide capacity");
        }
        let now = entry.store_time;
        self.lock_queue().push_back(entry);
        if let Err(e) = self.flush_due(now) {
            tracing::warn!("Write-behind flush failed, will retry: {}", e);
        }
        Ok(())
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<DelayedEntry>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_due(&self, now: u64) -> Vec<DelayedEntry> {
        let mut queue = self.lock_queue();
        let mut due = Vec::new();
        while let Some(front) = queue.front() {
            if front.store_time.saturating_add(self.write_delay_millis) > now {
                break;
            }
            if let Some(entry) = queue.pop_front() {
                due.push(entry);
            }
        }
        due
    }

    /// Writes `entries` in order. On failure they go back to the front of the queue and
    /// keep their capacity slots.
    fn write(&self, entries: Vec<DelayedEntry>) -> Result<usize> {
        let count = entries.len();
        if count == 0 {
            return Ok(0);
        }
        if let Err(e) = self.write_entries(&entries) {
            let mut queue = self.lock_queue();
            for entry in entries.into_iter().rev() {
                queue.push_front(entry);
            }
            return Err(e);
        }
        self.node_wide.check_and_add(-(count as i64));
        tracing::trace!("Write-behind flushed {} entries", count);
        Ok(count)
    }

    fn write_entries(&self, entries: &[DelayedEntry]) -> Result<()> {
        let mut stores = Vec::new();
        for entry in entries {
            let key = self.ss.to_object(&entry.key)?;
            match &entry.value {
                Some(value) => stores.push((key, self.ss.to_object(value)?)),
                None => {
                    if !stores.is_empty() {
                        self.store.store_all(&std::mem::take(&mut stores))?;
                    }
                    self.store.delete(&key)?;
                }
            }
        }
        if !stores.is_empty() {
            self.store.store_all(&stores)?;
        }
        Ok(())
    }
}

impl MapDataStore for WriteBehindStore {
    fn add(&self, key: &Data, value: &Data, now: u64) -> Result<()> {
        self.enqueue(DelayedEntry {
            key: key.clone(),
            value: Some(value.clone()),
            store_time: now,
        })
    }

    fn remove(&self, key: &Data, now: u64) -> Result<()> {
        self.enqueue(DelayedEntry {
            key: key.clone(),
            value: None,
            store_time: now,
        })
    }

    fn load(&self, key: &Data) -> Result<Option<Data>> {
        // A queued write is newer than whatever the store holds.
        let queued = self
            .lock_queue()
            .iter()
            .rev()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.value.clone());
        if let Some(value) = queued {
            return Ok(value);
        }
        match self.store.load(&self.ss.to_object(key)?)? {
            Some(value) => Ok(Some(self.ss.to_data(&value)?)),
            None => Ok(None),
        }
    }

    fn hard_flush(&self) -> Result<usize> {
        let all: Vec<DelayedEntry> = self.lock_queue().drain(..).collect();
        self.write(all)
    }

    fn flush_due(&self, now: u64) -> Result<usize> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.write(self.take_due(now))
    }

    fn pending_operation_count(&self) -> usize {
        self.lock_queue().len()
    }

    fn reset(&self) {
        let dropped = {
            let mut queue = self.lock_queue();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        if dropped > 0 {
            self.node_wide.check_and_add(-(dropped as i64));
            tracing::debug!("Discarded {} queued write-behind entries", dropped);
        }
    }

    fn reserved_capacity_counter(&self) -> &ReservedCapacityCounter {
        &self.reserved
    }
}
