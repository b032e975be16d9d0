use super::serialization::Data;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A stored value plus the metadata expiration needs.
#[derive(Debug, Clone)]
pub struct Record {
    pub value: Data,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_update_time: u64,
    pub hits: u64,
    /// Milliseconds, `0` = no TTL.
    pub ttl_millis: u64,
    /// Milliseconds, `0` = no max-idle.
    pub max_idle_millis: u64,
}

impl Record {
    pub fn new(value: Data, now: u64, ttl_millis: u64, max_idle_millis: u64) -> Self {
        Self {
            value,
            creation_time: now,
            last_access_time: now,
            last_update_time: now,
            hits: 0,
            ttl_millis,
            max_idle_millis,
        }
    }

    pub fn has_expiry(&self) -> bool {
        self.ttl_millis > 0 || self.max_idle_millis > 0
    }

    /// Earliest instant (ms) at which the record counts as expired.
    pub fn expiration_time(&self) -> Option<u64> {
        let ttl = (self.ttl_millis > 0)
            .then(|| self.last_update_time.saturating_add(self.ttl_millis));
        let idle = (self.max_idle_millis > 0)
            .then(|| self.last_access_time.saturating_add(self.max_idle_millis));
        match (ttl, idle) {
            (Some(t), Some(i)) => Some(t.min(i)),
            (t, i) => t.or(i),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration_time().is_some_and(|at| now >= at)
    }

    pub fn on_access(&mut self, now: u64) {
        self.hits += 1;
        self.last_access_time = now;
    }

    pub fn on_update(&mut self, value: Data, now: u64) {
        self.value = value;
        self.last_update_time = now;
        self.last_access_time = now;
    }
}

pub fn now_ms() -> u64 {
    millis(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
    )
}

/// Whole milliseconds of `duration`, clamped to `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
