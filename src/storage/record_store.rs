//! Record Store
//!
//! Storage of one map on one partition. Mutations come only from the execution
//! context that owns the partition; scans and the expiration sweep may read
//! concurrently, which the `DashMap` allows without extra locking.

use super::map_data_store::MapDataStore;
use super::record::{Record, millis};
use super::serialization::{Data, SerializationService, ValueComparator};
use crate::cluster::types::GENERIC_PARTITION_ID;
use crate::config::MapConfig;

use anyhow::Result;
use dashmap::DashMap;
use std::time::Duration;

pub struct RecordStore {
    name: String,
    partition_id: u32,
    ttl_millis: u64,
    max_idle_millis: u64,
    comparator: ValueComparator,
    records: DashMap<Data, Record>,
    map_data_store: Box<dyn MapDataStore>,
}

impl RecordStore {
    pub fn new(
        name: &str,
        partition_id: u32,
        config: &MapConfig,
        map_data_store: Box<dyn MapDataStore>,
    ) -> Self {
        assert!(
            partition_id != GENERIC_PARTITION_ID,
            "Cannot create a record store for the generic partition"
        );
        Self {
            name: name.to_string(),
            partition_id,
            ttl_millis: config.time_to_live_seconds.saturating_mul(1000),
            max_idle_millis: config.max_idle_seconds.saturating_mul(1000),
            comparator: ValueComparator::of(config.in_memory_format),
            records: DashMap::new(),
            map_data_store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    pub fn map_data_store(&self) -> &dyn MapDataStore {
        self.map_data_store.as_ref()
    }

    /// Returns the live value, evicting it first if it has expired.
    /// Misses read through to the map store.
    pub fn get(&self, key: &Data, now: u64) -> Result<Option<Data>> {
        if let Some(mut record) = self.records.get_mut(key) {
            if !record.is_expired(now) {
                record.on_access(now);
                return Ok(Some(record.value.clone()));
            }
        }
        if self.evict_if_expired(key, now) {
            tracing::trace!(
                "Lazily expired key in map '{}' partition {}",
                self.name,
                self.partition_id
            );
            return Ok(None);
        }

        match self.map_data_store.load(key)? {
            Some(loaded) => {
                self.records.insert(
                    key.clone(),
                    Record::new(loaded.clone(), now, self.ttl_millis, self.max_idle_millis),
                );
                Ok(Some(loaded))
            }
            None => Ok(None),
        }
    }

    /// Stores `value`, returning the previous live value.
    pub fn put(&self, key: Data, value: Data, ttl: Option<Duration>, now: u64) -> Result<Option<Data>> {
        self.map_data_store.add(&key, &value, now)?;

        let ttl_millis = ttl.map(millis).unwrap_or(self.ttl_millis);
        let old = match self.records.get_mut(&key) {
            Some(mut record) => {
                let old = (!record.is_expired(now)).then(|| record.value.clone());
                record.on_update(value, now);
                record.ttl_millis = ttl_millis;
                old
            }
            None => {
                self.records.insert(
                    key,
                    Record::new(value, now, ttl_millis, self.max_idle_millis),
                );
                None
            }
        };
        Ok(old)
    }

    /// Replaces the value only if the current one equals `expected`.
    pub fn replace_if_same(
        &self,
        key: Data,
        expected: &Data,
        value: Data,
        ss: &SerializationService,
        now: u64,
    ) -> Result<bool> {
        let matches = match self.records.get(&key) {
            Some(record) if !record.is_expired(now) => {
                self.comparator.is_equal(&record.value, expected, ss)
            }
            _ => false,
        };
        if matches {
            self.put(key, value, None, now)?;
        }
        Ok(matches)
    }

    pub fn remove(&self, key: &Data, now: u64) -> Result<Option<Data>> {
        self.map_data_store.remove(key, now)?;
        Ok(self
            .records
            .remove(key)
            .filter(|(_, record)| !record.is_expired(now))
            .map(|(_, record)| record.value))
    }

    pub fn contains_key(&self, key: &Data, now: u64) -> bool {
        self.records
            .get(key)
            .is_some_and(|record| !record.is_expired(now))
    }

    pub fn contains_value(&self, value: &Data, ss: &SerializationService, now: u64) -> bool {
        self.records.iter().any(|entry| {
            !entry.is_expired(now) && self.comparator.is_equal(&entry.value, value, ss)
        })
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of the live entries, used by partition scans.
    pub fn entries(&self, now: u64) -> Vec<(Data, Data)> {
        self.records
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value.clone()))
            .collect()
    }

    pub fn has_expirable_entries(&self) -> bool {
        self.ttl_millis > 0
            || self.max_idle_millis > 0
            || self.records.iter().any(|entry| entry.has_expiry())
    }

    /// Removes up to `max` expired records and returns them.
    pub fn evict_expired(&self, now: u64, max: usize) -> Vec<(Data, Data)> {
        let expired_keys: Vec<Data> = self
            .records
            .iter()
            .filter(|entry| entry.is_expired(now))
            .take(max)
            .map(|entry| entry.key().clone())
            .collect();

        expired_keys
            .into_iter()
            .filter_map(|key| {
                self.records
                    .remove_if(&key, |_, record| record.is_expired(now))
                    .map(|(key, record)| (key, record.value))
            })
            .collect()
    }

    fn evict_if_expired(&self, key: &Data, now: u64) -> bool {
        self.records
            .remove_if(key, |_, record| record.is_expired(now))
            .is_some()
    }

    /// Drops all records.
    ///
    /// On shutdown, pending write-behind entries are flushed first; on destroy they are
    /// discarded. Reservations are released in both cases.
    pub fn clear_partition(&self, on_shutdown: bool, on_destroy: bool) {
        if on_shutdown {
            match self.map_data_store.hard_flush() {
                Ok(flushed) if flushed > 0 => tracing::debug!(
                    "Flushed {} entries of map '{}' partition {} on shutdown",
                    flushed,
                    self.name,
                    self.partition_id
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(
                    "Failed to flush map '{}' partition {} on shutdown: {}",
                    self.name,
                    self.partition_id,
                    e
                ),
            }
        }
        if on_destroy {
            self.map_data_store.reset();
        }
        self.map_data_store
            .reserved_capacity_counter()
            .release_all_reservations();
        self.records.clear();
    }

    pub fn destroy(&self) {
        self.clear_partition(false, true);
    }
}
