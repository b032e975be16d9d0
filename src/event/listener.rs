//! Listener definitions.
//!
//! An [`EntryListener`] only implements the hooks it was built with. The set of hooks becomes its
//! capability mask ([`EntryListener::flags`]), which lets the registry skip events nobody
//! listens to before they are even deserialized.

use super::types::{EntryEvent, EntryEventType, MapEvent, MapPartitionLostEvent};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type EntryCallback = Arc<dyn Fn(&EntryEvent) + Send + Sync>;
pub type PartitionLostCallback = Arc<dyn Fn(&MapPartitionLostEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct EntryListener {
    hooks: HashMap<EntryEventType, EntryCallback>,
}

impl EntryListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, event_type: EntryEventType, callback: F) -> Self
    where
        F: Fn(&EntryEvent) + Send + Sync + 'static,
    {
        self.hooks.insert(event_type, Arc::new(callback));
        self
    }

    pub fn on_added<F: Fn(&EntryEvent) + Send + Sync + 'static>(self, callback: F) -> Self {
        self.on(EntryEventType::Added, callback)
    }

    pub fn on_removed<F: Fn(&EntryEvent) + Send + Sync + 'static>(self, callback: F) -> Self {
        self.on(EntryEventType::Removed, callback)
    }

    pub fn on_updated<F: Fn(&EntryEvent) + Send + Sync + 'static>(self, callback: F) -> Self {
        self.on(EntryEventType::Updated, callback)
    }

    pub fn on_evicted<F: Fn(&EntryEvent) + Send + Sync + 'static>(self, callback: F) -> Self {
        self.on(EntryEventType::Evicted, callback)
    }

    pub fn on_expired<F: Fn(&EntryEvent) + Send + Sync + 'static>(self, callback: F) -> Self {
        self.on(EntryEventType::Expired, callback)
    }

    /// Capability mask of the implemented hooks.
    pub fn flags(&self) -> u32 {
        self.hooks.keys().fold(0, |mask, event_type| mask | event_type.mask())
    }

    pub fn implements(&self, event_type: EntryEventType) -> bool {
        self.hooks.contains_key(&event_type)
    }

    pub fn dispatch(&self, event: &EntryEvent) {
        if let Some(hook) = self.hooks.get(&event.event_type) {
            hook(event);
        }
    }
}

impl fmt::Debug for EntryListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryListener")
            .field("flags", &format_args!("{:#b}", self.flags()))
            .finish()
    }
}

/// What a registration delivers to.
#[derive(Clone)]
pub enum Listener {
    Entry(EntryListener),
    /// Adapter for partition-lost events. They carry no entry data.
    PartitionLost(PartitionLostCallback),
}

impl Listener {
    pub fn partition_lost<F>(callback: F) -> Self
    where
        F: Fn(&MapPartitionLostEvent) + Send + Sync + 'static,
    {
        Listener::PartitionLost(Arc::new(callback))
    }

    pub fn dispatch(&self, event: &MapEvent) {
        match (self, event) {
            (Listener::Entry(listener), MapEvent::Entry(event)) => listener.dispatch(event),
            (Listener::PartitionLost(callback), MapEvent::PartitionLost(event)) => callback(event),
            _ => {}
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Entry(listener) => listener.fmt(f),
            Listener::PartitionLost(_) => f.write_str("PartitionLostListener"),
        }
    }
}
