//! Per-node map statistics.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Which operation a latency sample belongs to. Callers tag samples explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Put,
    Set,
    Get,
    Remove,
}

#[derive(Debug, Default)]
pub struct LocalMapStats {
    puts: AtomicU64,
    sets: AtomicU64,
    gets: AtomicU64,
    removes: AtomicU64,
    put_latency_nanos: AtomicU64,
    set_latency_nanos: AtomicU64,
    get_latency_nanos: AtomicU64,
    remove_latency_nanos: AtomicU64,
    hits: AtomicU64,
    expirations: AtomicU64,
}

impl LocalMapStats {
    pub fn record(&self, kind: OperationKind, latency: Duration) {
        let (count, total) = match kind {
            OperationKind::Put => (&self.puts, &self.put_latency_nanos),
            OperationKind::Set => (&self.sets, &self.set_latency_nanos),
            OperationKind::Get => (&self.gets, &self.get_latency_nanos),
            OperationKind::Remove => (&self.removes, &self.remove_latency_nanos),
        };
        count.fetch_add(1, Ordering::Relaxed);
        total.fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn increment_hits(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LocalMapStatsSnapshot {
        LocalMapStatsSnapshot {
            puts: self.puts.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            total_put_latency_nanos: self.put_latency_nanos.load(Ordering::Relaxed),
            total_set_latency_nanos: self.set_latency_nanos.load(Ordering::Relaxed),
            total_get_latency_nanos: self.get_latency_nanos.load(Ordering::Relaxed),
            total_remove_latency_nanos: self.remove_latency_nanos.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LocalMapStatsSnapshot {
    pub puts: u64,
    pub sets: u64,
    pub gets: u64,
    pub removes: u64,
    pub total_put_latency_nanos: u64,
    pub total_set_latency_nanos: u64,
    pub total_get_latency_nanos: u64,
    pub total_remove_latency_nanos: u64,
    pub hits: u64,
    pub expirations: u64,
}

#[derive(Default)]
pub struct LocalMapStatsProvider {
    stats: DashMap<String, Arc<LocalMapStats>>,
}

impl LocalMapStatsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, map_name: &str) -> Arc<LocalMapStats> {
        self.stats
            .entry(map_name.to_string())
            .or_default()
            .clone()
    }

    pub fn get(&self, map_name: &str) -> Option<Arc<LocalMapStats>> {
        self.stats.get(map_name).map(|stats| stats.clone())
    }

    pub fn destroy_local_map_stats(&self, map_name: &str) -> bool {
        self.stats.remove(map_name).is_some()
    }

    pub fn snapshots(&self) -> Vec<(String, LocalMapStatsSnapshot)> {
        let mut snapshots: Vec<_> = self
            .stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }
}
