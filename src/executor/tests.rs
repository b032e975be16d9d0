//! Executor Module Tests
//!
//! ## Test Scopes
//! - **Partition workers**: routing, per-partition ordering, panics, shutdown.
//! - **Completion handles**: bounded waits and interrupted operations.
//! - **Bounded executors**: concurrency cap.

#[cfg(test)]
mod tests {
    use crate::executor::service::{BoundedExecutor, ExecutionService};
    use crate::executor::types::Completion;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;

    // ============================================================
    // PARTITION WORKER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_partition_is_served_by_fixed_worker() {
        let service = ExecutionService::new(271, 4);

        assert_eq!(service.worker_count(), 4);
        assert_eq!(service.worker_of(0), 0);
        assert_eq!(service.worker_of(7), 3);
        assert_eq!(service.worker_of(270), 2);
    }

    #[tokio::test]
    async fn test_operations_on_one_partition_run_in_order() {
        // ARRANGE
        let service = ExecutionService::new(16, 2);
        let seen = Arc::new(Mutex::new(Vec::new()));

        // ACT: Queue 50 operations without awaiting in between
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let seen = seen.clone();
                service.submit_to_partition(3, move || async move {
                    seen.lock().unwrap().push(i);
                })
            })
            .collect();
        for handle in handles {
            handle.join().await.unwrap();
        }

        // ASSERT
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_run_on_partition_returns_value() {
        let service = ExecutionService::new(8, 2);

        let value = service.run_on_partition(5, || async { 40 + 2 }).await.unwrap();

        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_panicking_operation_does_not_kill_worker() {
        // ARRANGE
        let service = ExecutionService::new(4, 1);

        // ACT
        let crashed = service
            .submit_to_partition(0, || async {
                panic!("boom");
            })
            .await_completion(Duration::from_secs(5))
            .await;
        let after: Completion<u8> = service
            .submit_to_partition(1, || async { 1 })
            .await_completion(Duration::from_secs(5))
            .await;

        // ASSERT
        assert_eq!(crashed, Completion::Interrupted);
        assert_eq!(after, Completion::Done(1));
    }

    #[tokio::test]
    #[should_panic]
    async fn test_generic_partition_is_rejected() {
        let service = ExecutionService::new(4, 1);
        let _ = service.submit_to_partition(u32::MAX, || async {});
    }

    #[tokio::test]
    #[should_panic]
    async fn test_out_of_range_partition_is_rejected() {
        let service = ExecutionService::new(4, 1);
        let _ = service.submit_to_partition(4, || async {});
    }

    #[tokio::test]
    async fn test_after_shutdown_operations_are_interrupted() {
        let service = ExecutionService::new(4, 2);
        service.shutdown();
        assert!(service.is_shutdown());

        let result = service.run_on_partition(2, || async { 1 }).await;

        assert!(result.is_err());
    }

    // ============================================================
    // COMPLETION HANDLE TESTS
    // ============================================================

    #[tokio::test(start_paused = true)]
    async fn test_await_completion_times_out_on_stalled_partition() {
        // ARRANGE: Stall the worker of partition 1
        let service = ExecutionService::new(4, 2);
        let release = Arc::new(Notify::new());
        let gate = release.clone();
        let _stall = service.submit_to_partition(1, move || async move {
            gate.notified().await;
        });

        // ACT: Partition 3 shares the worker with partition 1
        let queued = service.submit_to_partition(3, || async { "done" });
        let outcome = queued.await_completion(Duration::from_secs(30)).await;

        // ASSERT
        assert_eq!(outcome, Completion::TimedOut);

        // Unrelated worker is unaffected
        let other = service
            .submit_to_partition(2, || async { "fine" })
            .await_completion(Duration::from_secs(30))
            .await;
        assert_eq!(other, Completion::Done("fine"));

        release.notify_one();
    }

    // ============================================================
    // BOUNDED EXECUTOR TESTS
    // ============================================================

    #[tokio::test]
    async fn test_bounded_executor_caps_concurrency() {
        // ARRANGE
        let executor = BoundedExecutor::new("query", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        // ACT
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                executor.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // ASSERT
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(executor.pool_size(), 2);
    }

    #[tokio::test]
    async fn test_named_executor_is_created_once() {
        let service = ExecutionService::new(4, 1);

        let first = service.get_or_create_executor("query", 3);
        let second = service.get_or_create_executor("query", 10);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.pool_size(), 3);
        assert!(service.executor("missing").is_none());
    }

    #[tokio::test]
    async fn test_shut_down_executor_rejects_tasks() {
        let executor = BoundedExecutor::new("query", 1);
        executor.shutdown();

        let result = executor.submit(|| 1).await.unwrap();

        assert!(result.is_err());
    }
}
