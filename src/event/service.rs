//! Event Service
//!
//! Listener registrations per map, plus a single dispatcher task that delivers events in the
//! order they were published. Publishing never blocks on listeners.

use super::filter::{EntryFilterContext, EventFilter};
use super::listener::{EntryListener, Listener};
use super::types::{EntryEvent, EntryEventType, MapEvent, MapPartitionLostEvent};
use crate::cluster::types::NodeId;
use crate::query::extractors::Extractors;
use crate::storage::serialization::{Data, SerializationService};

use dashmap::DashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug)]
pub struct Registration {
    pub id: Uuid,
    pub map_name: String,
    pub listener: Listener,
    pub filter: EventFilter,
    /// Local registrations only hear events of this member. Every event published through
    /// this service originates here, so the flag is informational and both kinds receive
    /// the same events; it matters to a layer that forwards remote events.
    pub local: bool,
}

enum Dispatch {
    Deliver {
        registrations: Vec<Arc<Registration>>,
        event: MapEvent,
    },
    Barrier(oneshot::Sender<()>),
}

pub struct EventService {
    registrations: DashMap<String, Vec<Arc<Registration>>>,
    sender: mpsc::UnboundedSender<Dispatch>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    ss: SerializationService,
}

impl EventService {
    /// Starts the dispatcher. Must be called within a tokio runtime.
    pub fn new(ss: SerializationService) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_loop(receiver));
        Arc::new(Self {
            registrations: DashMap::new(),
            sender,
            dispatcher: Mutex::new(Some(dispatcher)),
            ss,
        })
    }

    /// Cluster-wide entry listener.
    pub fn add_entry_listener(&self, map_name: &str, listener: EntryListener, filter: EventFilter) -> Uuid {
        self.add_entry_registration(map_name, listener, filter, false)
    }

    pub fn add_local_entry_listener(
        &self,
        map_name: &str,
        listener: EntryListener,
        filter: EventFilter,
    ) -> Uuid {
        self.add_entry_registration(map_name, listener, filter, true)
    }

    fn add_entry_registration(
        &self,
        map_name: &str,
        listener: EntryListener,
        filter: EventFilter,
        local: bool,
    ) -> Uuid {
        let filter = EventFilter::with_flags(listener.flags(), filter);
        self.register(map_name, Listener::Entry(listener), filter, local)
    }

    pub fn add_partition_lost_listener<F>(&self, map_name: &str, callback: F) -> Uuid
    where
        F: Fn(&MapPartitionLostEvent) + Send + Sync + 'static,
    {
        self.register(
            map_name,
            Listener::partition_lost(callback),
            EventFilter::PartitionLost,
            false,
        )
    }

    fn register(&self, map_name: &str, listener: Listener, filter: EventFilter, local: bool) -> Uuid {
        let id = Uuid::new_v4();
        tracing::debug!(
            "Registered {} listener {} on map '{}' ({:?})",
            if local { "local" } else { "cluster-wide" },
            id,
            map_name,
            listener
        );
        self.registrations
            .entry(map_name.to_string())
            .or_default()
            .push(Arc::new(Registration {
                id,
                map_name: map_name.to_string(),
                listener,
                filter,
                local,
            }));
        id
    }

    /// Returns `false` when no such registration exists.
    pub fn deregister_listener(&self, map_name: &str, id: Uuid) -> bool {
        let removed = match self.registrations.get_mut(map_name) {
            Some(mut registrations) => {
                let before = registrations.len();
                registrations.retain(|registration| registration.id != id);
                before != registrations.len()
            }
            None => false,
        };
        self.registrations
            .remove_if(map_name, |_, registrations| registrations.is_empty());
        if removed {
            tracing::debug!("Deregistered listener {} from map '{}'", id, map_name);
        }
        removed
    }

    pub fn deregister_all_listeners(&self, map_name: &str) -> usize {
        let removed = self
            .registrations
            .remove(map_name)
            .map(|(_, registrations)| registrations.len())
            .unwrap_or(0);
        if removed > 0 {
            tracing::debug!("Deregistered {} listeners from map '{}'", removed, map_name);
        }
        removed
    }

    pub fn registrations(&self, map_name: &str) -> Vec<Arc<Registration>> {
        self.registrations
            .get(map_name)
            .map(|registrations| registrations.clone())
            .unwrap_or_default()
    }

    pub fn has_event_registration(&self, map_name: &str) -> bool {
        self.registrations.contains_key(map_name)
    }

    pub fn has_interested_listener(&self, map_name: &str, event_type: EntryEventType) -> bool {
        self.registrations.get(map_name).is_some_and(|registrations| {
            registrations
                .iter()
                .any(|registration| registration.filter.is_interested_in(event_type))
        })
    }

    /// Publishes an entry event to every matching registration.
    ///
    /// Nothing is deserialized unless some registration's capability mask covers `event_type`.
    #[allow(clippy::too_many_arguments)]
    pub fn publish_entry_event(
        &self,
        map_name: &str,
        event_type: EntryEventType,
        partition_id: u32,
        key: &Data,
        old_value: Option<&Data>,
        value: Option<&Data>,
        extractors: &Extractors,
    ) {
        let interested: Vec<Arc<Registration>> = match self.registrations.get(map_name) {
            Some(registrations) => registrations
                .iter()
                .filter(|registration| registration.filter.is_interested_in(event_type))
                .cloned()
                .collect(),
            None => return,
        };
        if interested.is_empty() {
            return;
        }

        let decode = |data: Option<&Data>| data.map(|d| self.ss.to_object(d)).transpose();
        let (key_object, old_object, new_object) =
            match (self.ss.to_object(key), decode(old_value), decode(value)) {
                (Ok(k), Ok(o), Ok(n)) => (k, o, n),
                _ => {
                    tracing::warn!(
                        "Dropping {:?} event on map '{}': undecodable entry",
                        event_type,
                        map_name
                    );
                    return;
                }
            };

        let context = EntryFilterContext {
            event_type,
            key_data: key,
            key: &key_object,
            old_value: old_object.as_ref(),
            value: new_object.as_ref(),
            extractors,
        };
        let matching: Vec<Arc<Registration>> = interested
            .into_iter()
            .filter(|registration| registration.filter.eval_entry(&context))
            .collect();
        if matching.is_empty() {
            return;
        }

        let event = MapEvent::Entry(EntryEvent {
            map_name: map_name.to_string(),
            event_type,
            key: key_object,
            old_value: old_object,
            value: new_object,
            partition_id,
        });
        self.send(matching, event);
    }

    pub fn publish_partition_lost(&self, map_name: &str, partition_id: u32, member: Option<NodeId>) {
        let matching: Vec<Arc<Registration>> = self
            .registrations(map_name)
            .into_iter()
            .filter(|registration| registration.filter.accepts_partition_lost())
            .collect();
        if matching.is_empty() {
            return;
        }
        tracing::warn!("Map '{}' lost partition {}", map_name, partition_id);
        self.send(
            matching,
            MapEvent::PartitionLost(MapPartitionLostEvent {
                map_name: map_name.to_string(),
                partition_id,
                member,
            }),
        );
    }

    fn send(&self, registrations: Vec<Arc<Registration>>, event: MapEvent) {
        if self
            .sender
            .send(Dispatch::Deliver {
                registrations,
                event,
            })
            .is_err()
        {
            tracing::debug!("Event dropped, dispatcher is stopped");
        }
    }

    /// Resolves once every event published before this call has been delivered.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Dispatch::Barrier(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn shutdown(&self) {
        self.registrations.clear();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = dispatcher {
            handle.abort();
            tracing::info!("Event dispatcher stopped");
        }
    }
}

async fn dispatch_loop(mut receiver: mpsc::UnboundedReceiver<Dispatch>) {
    while let Some(dispatch) = receiver.recv().await {
        match dispatch {
            Dispatch::Deliver {
                registrations,
                event,
            } => {
                for registration in registrations {
                    let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        registration.listener.dispatch(&event)
                    }));
                    if delivered.is_err() {
                        tracing::error!(
                            "Listener {} on map '{}' panicked",
                            registration.id,
                            registration.map_name
                        );
                    }
                }
            }
            Dispatch::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}
