//! Event Module Tests
//!
//! ## Test Scopes
//! - **Registration**: local vs cluster-wide, deregistration semantics.
//! - **Filtering**: capability mask, key and query filters, partition-lost isolation.
//! - **Dispatch**: publication order, panicking listeners.

#[cfg(test)]
mod tests {
    use crate::event::filter::EventFilter;
    use crate::event::listener::EntryListener;
    use crate::event::service::EventService;
    use crate::event::types::{ALL_EVENTS_MASK, EntryEvent, EntryEventType, MapPartitionLostEvent};
    use crate::query::extractors::Extractors;
    use crate::query::predicate::Predicate;
    use crate::storage::serialization::{Data, SerializationService};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    const MAP: &str = "orders";

    fn data(value: serde_json::Value) -> Data {
        SerializationService.to_data(&value).unwrap()
    }

    fn recording_listener(seen: Arc<Mutex<Vec<EntryEvent>>>) -> EntryListener {
        let added = seen.clone();
        let removed = seen;
        EntryListener::new()
            .on_added(move |event| added.lock().unwrap().push(event.clone()))
            .on_removed(move |event| removed.lock().unwrap().push(event.clone()))
    }

    fn publish(service: &EventService, event_type: EntryEventType, key: i64, old: Option<i64>, new: Option<i64>) {
        let old = old.map(|v| data(json!({ "amount": v })));
        let new = new.map(|v| data(json!({ "amount": v })));
        service.publish_entry_event(
            MAP,
            event_type,
            0,
            &data(json!(key)),
            old.as_ref(),
            new.as_ref(),
            &Extractors::default(),
        );
    }

    // ============================================================
    // REGISTRATION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_register_local_and_cluster_wide() {
        let service = EventService::new(SerializationService);

        let local = service.add_local_entry_listener(MAP, EntryListener::new(), EventFilter::True);
        let global = service.add_entry_listener(MAP, EntryListener::new(), EventFilter::True);

        let registrations = service.registrations(MAP);
        assert_eq!(registrations.len(), 2);
        assert!(registrations.iter().any(|r| r.id == local && r.local));
        assert!(registrations.iter().any(|r| r.id == global && !r.local));
        assert!(service.has_event_registration(MAP));
    }

    #[tokio::test]
    async fn test_local_and_cluster_wide_hear_events_of_this_member() {
        let service = EventService::new(SerializationService);
        let local_seen = Arc::new(Mutex::new(Vec::new()));
        let global_seen = Arc::new(Mutex::new(Vec::new()));
        service.add_local_entry_listener(MAP, recording_listener(local_seen.clone()), EventFilter::True);
        service.add_entry_listener(MAP, recording_listener(global_seen.clone()), EventFilter::True);

        publish(&service, EntryEventType::Added, 1, None, Some(10));
        publish(&service, EntryEventType::Removed, 1, Some(10), None);
        service.flush().await;

        assert_eq!(local_seen.lock().unwrap().len(), 2);
        assert_eq!(global_seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deregister_unknown_id_returns_false() {
        let service = EventService::new(SerializationService);
        let id = service.add_entry_listener(MAP, EntryListener::new(), EventFilter::True);

        assert!(!service.deregister_listener(MAP, Uuid::new_v4()));
        assert!(!service.deregister_listener("other", id));
        assert!(service.deregister_listener(MAP, id));
        assert!(!service.deregister_listener(MAP, id), "second deregistration is a no-op");
        assert!(!service.has_event_registration(MAP));
    }

    #[tokio::test]
    async fn test_deregister_all_listeners() {
        let service = EventService::new(SerializationService);
        service.add_entry_listener(MAP, EntryListener::new(), EventFilter::True);
        service.add_partition_lost_listener(MAP, |_| {});

        assert_eq!(service.deregister_all_listeners(MAP), 2);
        assert_eq!(service.deregister_all_listeners(MAP), 0);
    }

    // ============================================================
    // FILTERING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_capability_mask_skips_unimplemented_hooks() {
        // ARRANGE: Listener only implements added/removed
        let service = EventService::new(SerializationService);
        let seen = Arc::new(Mutex::new(Vec::new()));
        service.add_entry_listener(MAP, recording_listener(seen.clone()), EventFilter::True);

        // ACT
        publish(&service, EntryEventType::Added, 1, None, Some(10));
        publish(&service, EntryEventType::Updated, 1, Some(10), Some(20));
        publish(&service, EntryEventType::Removed, 1, Some(20), None);
        service.flush().await;

        // ASSERT
        let seen = seen.lock().unwrap();
        let types: Vec<_> = seen.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EntryEventType::Added, EntryEventType::Removed]);
        assert!(service.has_interested_listener(MAP, EntryEventType::Added));
        assert!(!service.has_interested_listener(MAP, EntryEventType::Updated));
        assert_eq!(seen[0].value, Some(json!({"amount": 10})));
        assert_eq!(seen[1].old_value, Some(json!({"amount": 20})));
    }

    #[test]
    fn test_listener_flags() {
        let listener = EntryListener::new().on_added(|_| {}).on_expired(|_| {});

        assert_eq!(
            listener.flags(),
            EntryEventType::Added.mask() | EntryEventType::Expired.mask()
        );
        assert!(listener.implements(EntryEventType::Expired));
        assert!(!listener.implements(EntryEventType::Evicted));
        assert_eq!(
            EntryEventType::ALL.iter().fold(0, |m, t| m | t.mask()),
            ALL_EVENTS_MASK
        );
    }

    #[tokio::test]
    async fn test_key_filter() {
        let service = EventService::new(SerializationService);
        let seen = Arc::new(Mutex::new(Vec::new()));
        service.add_entry_listener(
            MAP,
            recording_listener(seen.clone()),
            EventFilter::Key(data(json!(2))),
        );

        publish(&service, EntryEventType::Added, 1, None, Some(10));
        publish(&service, EntryEventType::Added, 2, None, Some(20));
        service.flush().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].key, json!(2));
    }

    #[tokio::test]
    async fn test_query_filter_uses_old_value_on_removal() {
        let service = EventService::new(SerializationService);
        let seen = Arc::new(Mutex::new(Vec::new()));
        service.add_entry_listener(
            MAP,
            recording_listener(seen.clone()),
            EventFilter::Query(Predicate::greater_than("amount", 100)),
        );

        publish(&service, EntryEventType::Added, 1, None, Some(50));
        publish(&service, EntryEventType::Added, 2, None, Some(500));
        publish(&service, EntryEventType::Removed, 2, Some(500), None);
        service.flush().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.key == json!(2)));
    }

    #[tokio::test]
    async fn test_partition_lost_listener_only_gets_partition_lost() {
        let service = EventService::new(SerializationService);
        let lost: Arc<Mutex<Vec<MapPartitionLostEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = lost.clone();
        service.add_partition_lost_listener(MAP, move |event| sink.lock().unwrap().push(event.clone()));
        let entries = Arc::new(Mutex::new(Vec::new()));
        service.add_entry_listener(MAP, recording_listener(entries.clone()), EventFilter::True);

        publish(&service, EntryEventType::Added, 1, None, Some(1));
        service.publish_partition_lost(MAP, 42, None);
        service.flush().await;

        let lost = lost.lock().unwrap();
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].partition_id, 42);
        assert_eq!(entries.lock().unwrap().len(), 1, "entry listener must not see partition loss");
    }

    // ============================================================
    // DISPATCH TESTS
    // ============================================================

    #[tokio::test]
    async fn test_events_are_delivered_in_publication_order() {
        let service = EventService::new(SerializationService);
        let seen = Arc::new(Mutex::new(Vec::new()));
        service.add_entry_listener(MAP, recording_listener(seen.clone()), EventFilter::True);

        for key in 0..100 {
            publish(&service, EntryEventType::Added, key, None, Some(key));
        }
        service.flush().await;

        let keys: Vec<_> = seen.lock().unwrap().iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, (0..100).map(|k| json!(k)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_dispatch() {
        let service = EventService::new(SerializationService);
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        service.add_entry_listener(
            MAP,
            EntryListener::new().on_added(|_| panic!("listener failure")),
            EventFilter::True,
        );
        service.add_entry_listener(
            MAP,
            EntryListener::new().on_added(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            EventFilter::True,
        );

        publish(&service, EntryEventType::Added, 1, None, Some(1));
        publish(&service, EntryEventType::Added, 2, None, Some(2));
        service.flush().await;

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }
}
