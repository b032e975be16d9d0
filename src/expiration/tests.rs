//! Expiration Module Tests
//!
//! ## Test Scopes
//! - **Sweep**: eviction bounds, expired events, stats.
//! - **Scheduling**: periodic runs, pause on non-operational cluster states, shutdown gating.

#[cfg(test)]
mod tests {
    use crate::cluster::types::ClusterState;
    use crate::config::{Config, Properties, Property};
    use crate::event::filter::EventFilter;
    use crate::event::listener::EntryListener;
    use crate::map::context::{Collaborators, MapServiceContext};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const MAP: &str = "sessions";
    const SHORT_TTL: Option<Duration> = Some(Duration::from_millis(1));

    fn context(partitions: u32, properties: Properties) -> Arc<MapServiceContext> {
        MapServiceContext::with_properties(
            properties.with(Property::MapExpiryTaskPeriodSeconds, 1),
            Config::default(),
            Collaborators::single_node(partitions),
        )
    }

    /// Lets the wall clock pass every short TTL used here.
    fn outlive_ttl() {
        std::thread::sleep(Duration::from_millis(20));
    }

    // ============================================================
    // SWEEP TESTS
    // ============================================================

    #[tokio::test]
    async fn test_sweep_respects_min_count() {
        // ARRANGE: one partition, percentage bound disabled
        let ctx = context(
            1,
            Properties::new()
                .with(Property::MapExpiryCleanupPercentage, 0)
                .with(Property::MapExpiryCleanupMinCount, 3),
        );
        for i in 0..10 {
            ctx.put(MAP, json!(i), json!(i), SHORT_TTL).await.unwrap();
        }
        outlive_ttl();

        // ACT
        let first = ctx.expiration_manager().sweep_now().await;
        let second = ctx.expiration_manager().sweep_now().await;

        // ASSERT
        assert_eq!(first, 3);
        assert_eq!(second, 3);
        assert_eq!(ctx.get_existing_record_store(0, MAP).unwrap().size(), 4);
        assert_eq!(ctx.stats().get(MAP).unwrap().snapshot().expirations, 6);
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_entries() {
        let ctx = context(4, Properties::new());
        ctx.put(MAP, json!("short"), json!(1), SHORT_TTL).await.unwrap();
        ctx.put(MAP, json!("long"), json!(2), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        ctx.put(MAP, json!("forever"), json!(3), None).await.unwrap();
        outlive_ttl();

        assert_eq!(ctx.expiration_manager().sweep_now().await, 1);
        assert_eq!(ctx.size(MAP).await.unwrap(), 2);
        assert!(!ctx.contains_key(MAP, json!("short")).await.unwrap());
        assert!(ctx.contains_key(MAP, json!("long")).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_publishes_expired_events() {
        let ctx = context(8, Properties::new());
        let expired = Arc::new(AtomicUsize::new(0));
        let counter = expired.clone();
        ctx.add_entry_listener(
            MAP,
            EntryListener::new().on_expired(move |event| {
                assert!(event.value.is_none());
                assert!(event.old_value.is_some());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            EventFilter::True,
        );
        for i in 0..5 {
            ctx.put(MAP, json!(i), json!({ "n": i }), SHORT_TTL).await.unwrap();
        }
        outlive_ttl();

        ctx.expiration_manager().sweep_now().await;
        ctx.event_service().flush().await;

        assert_eq!(expired.load(Ordering::SeqCst), 5);
    }

    // ============================================================
    // SCHEDULING TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_runs() {
        let ctx = context(4, Properties::new());
        ctx.put(MAP, json!("k"), json!("v"), SHORT_TTL).await.unwrap();
        outlive_ttl();

        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(ctx.expiration_manager().sweep_count() >= 2);
        assert_eq!(ctx.size(MAP).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_paused_while_cluster_not_operational() {
        // ARRANGE
        let ctx = context(4, Properties::new());
        ctx.put(MAP, json!("k"), json!("v"), SHORT_TTL).await.unwrap();
        outlive_ttl();

        // ACT: passive cluster, several periods elapse
        ctx.on_cluster_state_change(ClusterState::Passive);
        tokio::time::sleep(Duration::from_secs(5)).await;

        // ASSERT
        assert!(ctx.expiration_manager().is_paused());
        assert_eq!(ctx.expiration_manager().sweep_count(), 0);
        let key = ctx.serialization_service().to_data(&json!("k")).unwrap();
        let partition_id = ctx.partition_service().partition_id_of(&key);
        assert_eq!(ctx.get_existing_record_store(partition_id, MAP).unwrap().size(), 1);

        // ACT: in transition still pauses, active resumes
        ctx.on_cluster_state_change(ClusterState::InTransition);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ctx.expiration_manager().sweep_count(), 0);

        ctx.on_cluster_state_change(ClusterState::Active);
        tokio::time::sleep(Duration::from_secs(2)).await;

        // ASSERT
        assert!(!ctx.expiration_manager().is_paused());
        assert!(ctx.expiration_manager().sweep_count() >= 1);
        assert_eq!(ctx.size(MAP).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frozen_cluster_keeps_sweeping() {
        let ctx = context(2, Properties::new());

        ctx.on_cluster_state_change(ClusterState::Frozen);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(!ctx.expiration_manager().is_paused());
        assert!(ctx.expiration_manager().sweep_count() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sweep_after_shutdown() {
        let ctx = context(2, Properties::new());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let before = ctx.expiration_manager().sweep_count();
        assert!(before >= 1);

        ctx.expiration_manager().on_shutdown();
        ctx.expiration_manager().on_shutdown();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(ctx.expiration_manager().is_shut_down());
        assert_eq!(ctx.expiration_manager().sweep_count(), before);
    }

    #[tokio::test]
    async fn test_no_sweep_starts_once_shutdown_began() {
        // ARRANGE
        let ctx = context(1, Properties::new());
        ctx.put(MAP, json!("k"), json!("v"), SHORT_TTL).await.unwrap();
        outlive_ttl();

        // ACT
        ctx.expiration_manager().on_shutdown();
        ctx.expiration_manager().start();
        let evicted = ctx.expiration_manager().sweep_now().await;

        // ASSERT: nothing evicted, the expired record is still stored
        assert_eq!(evicted, 0);
        assert!(ctx.expiration_manager().is_shut_down());
        assert_eq!(ctx.get_existing_record_store(0, MAP).unwrap().size(), 1);
    }
}
