use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-map counters of mutations queued for WAN replication.
#[derive(Default)]
pub struct WanEventCounters {
    counters: DashMap<String, AtomicU64>,
}

impl WanEventCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, map_name: &str) {
        self.counters
            .entry(map_name.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, map_name: &str) -> u64 {
        self.counters
            .get(map_name)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn remove_counter(&self, map_name: &str) -> bool {
        self.counters.remove(map_name).is_some()
    }
}
