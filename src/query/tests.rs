//! Query Module Tests
//!
//! ## Test Scopes
//! - **Predicates & extractors**: attribute resolution and predicate semantics.
//! - **Optimizer**: constant folding and flattening.
//! - **Scan strategies**: serial and parallel scans agree; timeouts and scan failures on both.
//! - **Runner & engine**: result kinds, aggregations (exact integer sums), size limit,
//!   partition targeting.

#[cfg(test)]
mod tests {
    use crate::cluster::ownership::{OwnedPartitions, PartitionIdSet};
    use crate::cluster::partition_table::PartitionTable;
    use crate::config::{MapConfig, Properties, Property};
    use crate::error::MapError;
    use crate::executor::service::{BoundedExecutor, ExecutionService};
    use crate::query::aggregation::Aggregator;
    use crate::query::engine::{QueryEngine, QueryRunner};
    use crate::query::extractors::Extractors;
    use crate::query::optimizer::{EmptyOptimizer, QueryOptimizer, RuleBasedOptimizer};
    use crate::query::predicate::Predicate;
    use crate::query::result::QueryResultRow;
    use crate::query::scan::{
        CallerRunsPartitionScanExecutor, ParallelPartitionScanExecutor, PartitionScanExecutor,
        PartitionScanRunner,
    };
    use crate::query::{IterationType, Query, Target};
    use crate::storage::map_data_store::{EmptyMapDataStore, NodeWideUsedCapacityCounter};
    use crate::storage::partition_container::PartitionContainer;
    use crate::storage::record::now_ms;
    use crate::storage::record_store::RecordStore;
    use crate::storage::serialization::{Data, SerializationService, Value};
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::time::Duration;

    const MAP: &str = "people";

    fn person(i: u64) -> Value {
        json!({
            "name": format!("person-{}", i),
            "age": i % 100,
            "address": { "city": if i % 2 == 0 { "Las Palmas" } else { "Madrid" } },
        })
    }

    /// `keys` people spread over `partition_count` partitions by `key % partition_count`.
    fn populated_partitions(partition_count: u32, keys: u64) -> Arc<Vec<PartitionContainer>> {
        let ss = SerializationService;
        let counter = NodeWideUsedCapacityCounter::new(1_000);
        let partitions: Vec<PartitionContainer> =
            (0..partition_count).map(PartitionContainer::new).collect();

        for i in 0..keys {
            let partition_id = (i % partition_count as u64) as u32;
            let store = partitions[partition_id as usize].get_or_create_record_store(MAP, || {
                RecordStore::new(
                    MAP,
                    partition_id,
                    &MapConfig::default(),
                    Box::new(EmptyMapDataStore::new(counter.clone())),
                )
            });
            store
                .put(
                    ss.to_data(&json!(i)).unwrap(),
                    ss.to_data(&person(i)).unwrap(),
                    None,
                    now_ms(),
                )
                .unwrap();
        }
        Arc::new(partitions)
    }

    fn rows_as_set(rows: &[QueryResultRow]) -> HashSet<QueryResultRow> {
        rows.iter().cloned().collect()
    }

    fn eval(predicate: &Predicate, key: Value, value: Value) -> bool {
        predicate.apply(&key, &value, &Extractors::default())
    }

    // ============================================================
    // PREDICATE & EXTRACTOR TESTS
    // ============================================================

    #[test]
    fn test_extractors_resolve_key_this_path_and_alias() {
        let mut aliases = HashMap::new();
        aliases.insert("city".to_string(), "address.city".to_string());
        let extractors = Extractors::new(aliases);
        let key = json!({"id": 7});
        let value = json!({"address": {"city": "Telde"}, "tags": ["a", "b"]});

        assert_eq!(extractors.extract("__key", &key, &value), Some(key.clone()));
        assert_eq!(extractors.extract("__key.id", &key, &value), Some(json!(7)));
        assert_eq!(extractors.extract("this", &key, &value), Some(value.clone()));
        assert_eq!(extractors.extract("city", &key, &value), Some(json!("Telde")));
        assert_eq!(extractors.extract("this.tags.1", &key, &value), Some(json!("b")));
        assert_eq!(extractors.extract("missing.path", &key, &value), None);
    }

    #[test]
    fn test_comparison_predicates() {
        let v = json!({"age": 30, "name": "ana"});

        assert!(eval(&Predicate::equal("age", 30), json!(1), v.clone()));
        assert!(eval(&Predicate::equal("age", 30.0), json!(1), v.clone()), "numeric equality ignores representation");
        assert!(eval(&Predicate::greater_than("age", 29), json!(1), v.clone()));
        assert!(!eval(&Predicate::greater_than("age", 30), json!(1), v.clone()));
        assert!(eval(&Predicate::greater_equal("age", 30), json!(1), v.clone()));
        assert!(eval(&Predicate::less_equal("age", 30), json!(1), v.clone()));
        assert!(eval(&Predicate::between("age", 30, 40), json!(1), v.clone()));
        assert!(eval(&Predicate::is_in("name", vec![json!("bob"), json!("ana")]), json!(1), v.clone()));
        assert!(eval(&Predicate::not_equal("name", "bob"), json!(1), v.clone()));
        assert!(!eval(&Predicate::less_than("missing", 100), json!(1), v.clone()), "missing attribute never matches");
        assert!(!eval(&Predicate::greater_than("name", 3), json!(1), v), "incomparable kinds never match");
    }

    #[test]
    fn test_like_and_regex_predicates() {
        let v = json!({"name": "person-42"});

        assert!(eval(&Predicate::like("name", "person-%").unwrap(), json!(1), v.clone()));
        assert!(eval(&Predicate::like("name", "person-4_").unwrap(), json!(1), v.clone()));
        assert!(!eval(&Predicate::like("name", "person-4").unwrap(), json!(1), v.clone()));
        assert!(eval(&Predicate::regex("name", r"person-\d+").unwrap(), json!(1), v.clone()));
        assert!(!eval(&Predicate::regex("name", r"\d+").unwrap(), json!(1), v), "regex must match the whole string");
        assert!(Predicate::regex("name", "(").is_err());
    }

    #[test]
    fn test_like_escapes_regex_metacharacters() {
        let predicate = Predicate::like("name", "a.c").unwrap();

        assert!(eval(&predicate, json!(1), json!({"name": "a.c"})));
        assert!(!eval(&predicate, json!(1), json!({"name": "abc"})));
    }

    #[test]
    fn test_logical_predicates() {
        let v = json!({"age": 30});
        let adult = Predicate::greater_equal("age", 18);
        let senior = Predicate::greater_equal("age", 65);

        assert!(eval(&Predicate::and(vec![adult.clone(), Predicate::not(senior.clone())]), json!(1), v.clone()));
        assert!(eval(&Predicate::or(vec![senior.clone(), adult]), json!(1), v.clone()));
        assert!(!eval(&Predicate::and(vec![senior, Predicate::True]), json!(1), v));
    }

    // ============================================================
    // OPTIMIZER TESTS
    // ============================================================

    #[test]
    fn test_rule_optimizer_folds_constants_and_flattens() {
        let optimizer = RuleBasedOptimizer;
        let a = Predicate::equal("a", 1);
        let b = Predicate::equal("b", 2);

        let flattened = optimizer.optimize(Predicate::and(vec![
            Predicate::True,
            a.clone(),
            Predicate::and(vec![b.clone(), Predicate::True]),
        ]));
        match flattened {
            Predicate::And(operands) => assert_eq!(operands.len(), 2),
            other => panic!("expected flattened And, got {:?}", other),
        }

        assert!(matches!(
            optimizer.optimize(Predicate::and(vec![a.clone(), Predicate::False])),
            Predicate::False
        ));
        assert!(matches!(
            optimizer.optimize(Predicate::or(vec![a.clone(), Predicate::True])),
            Predicate::True
        ));
        assert!(matches!(
            optimizer.optimize(Predicate::or(vec![Predicate::False, a.clone()])),
            Predicate::Equal(..)
        ));
        assert!(matches!(
            optimizer.optimize(Predicate::not(Predicate::not(b))),
            Predicate::Equal(..)
        ));
        assert!(matches!(optimizer.optimize(Predicate::and(vec![])), Predicate::True));
    }

    #[test]
    fn test_empty_optimizer_keeps_predicate() {
        let optimized = EmptyOptimizer.optimize(Predicate::and(vec![Predicate::True]));
        assert!(matches!(optimized, Predicate::And(ref operands) if operands.len() == 1));
    }

    // ============================================================
    // SCAN STRATEGY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_parallel_scan_matches_serial_scan() {
        // ARRANGE
        let partitions = populated_partitions(16, 1_000);
        let runner = Arc::new(PartitionScanRunner::new(partitions, SerializationService));
        let serial = CallerRunsPartitionScanExecutor::new(runner.clone());
        let parallel = ParallelPartitionScanExecutor::new(
            runner,
            Arc::new(BoundedExecutor::new("query", 4)),
            Duration::from_secs(10),
        );
        let query = Arc::new(Query::new(MAP, Predicate::greater_equal("age", 50)));
        let all: Vec<u32> = (0..16).collect();

        // ACT
        let serial_scans = serial
            .execute(query.clone(), Arc::new(Extractors::default()), all.clone())
            .await
            .unwrap();
        let parallel_scans = parallel
            .execute(query, Arc::new(Extractors::default()), all)
            .await
            .unwrap();

        // ASSERT
        let serial_rows: Vec<_> = serial_scans.into_iter().flat_map(|s| s.rows).collect();
        let parallel_rows: Vec<_> = parallel_scans.into_iter().flat_map(|s| s.rows).collect();
        assert_eq!(serial_rows.len(), 500);
        assert_eq!(rows_as_set(&serial_rows), rows_as_set(&parallel_rows));
    }

    #[tokio::test]
    async fn test_parallel_scan_times_out_without_partial_rows() {
        // ARRANGE: Saturate the single query slot
        let partitions = populated_partitions(4, 100);
        let executor = Arc::new(BoundedExecutor::new("query", 1));
        let _blocker = executor.submit(|| std::thread::sleep(Duration::from_millis(300)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let scan = ParallelPartitionScanExecutor::new(
            Arc::new(PartitionScanRunner::new(partitions, SerializationService)),
            executor,
            Duration::from_millis(50),
        );

        // ACT
        let result = scan
            .execute(
                Arc::new(Query::new(MAP, Predicate::True)),
                Arc::new(Extractors::default()),
                vec![0, 1, 2, 3],
            )
            .await;

        // ASSERT
        match result {
            Err(e @ MapError::QueryTimeout { .. }) => assert!(e.is_timeout()),
            other => panic!("expected timeout, got {:?}", other.map(|r| r.len())),
        }
    }

    #[tokio::test]
    async fn test_corrupt_record_fails_scan_with_partition_id() {
        // ARRANGE
        let partitions = populated_partitions(4, 20);
        let store = partitions[2].get_existing_record_store(MAP).unwrap();
        store
            .put(
                Data::from_bytes(b"\"broken\"".to_vec()),
                Data::from_bytes(b"{not json".to_vec()),
                None,
                now_ms(),
            )
            .unwrap();
        let scan = CallerRunsPartitionScanExecutor::new(Arc::new(PartitionScanRunner::new(
            partitions,
            SerializationService,
        )));

        // ACT
        let result = scan
            .execute(
                Arc::new(Query::new(MAP, Predicate::True)),
                Arc::new(Extractors::default()),
                vec![0, 1, 2, 3],
            )
            .await;

        // ASSERT
        match result {
            Err(MapError::PartitionScan { partition_id, .. }) => assert_eq!(partition_id, 2),
            other => panic!("expected scan failure, got {:?}", other.map(|r| r.len())),
        }
    }

    #[tokio::test]
    async fn test_parallel_scan_propagates_partition_failures() {
        // ARRANGE: partition 1 holds an undecodable record
        let partitions = populated_partitions(4, 20);
        partitions[1]
            .get_existing_record_store(MAP)
            .unwrap()
            .put(
                Data::from_bytes(b"\"broken\"".to_vec()),
                Data::from_bytes(b"{not json".to_vec()),
                None,
                now_ms(),
            )
            .unwrap();
        let scan = ParallelPartitionScanExecutor::new(
            Arc::new(PartitionScanRunner::new(partitions, SerializationService)),
            Arc::new(BoundedExecutor::new("query", 4)),
            Duration::from_secs(10),
        );
        let query = Arc::new(Query::new(MAP, Predicate::True));

        // ACT
        let corrupt = scan
            .execute(query.clone(), Arc::new(Extractors::default()), vec![0, 1, 2, 3])
            .await;
        let crashed = scan
            .execute(query, Arc::new(Extractors::default()), vec![0, 9])
            .await;

        // ASSERT: the failing partition is named, neither is reported as a timeout
        match corrupt {
            Err(MapError::PartitionScan { partition_id, .. }) => assert_eq!(partition_id, 1),
            other => panic!("expected scan failure, got {:?}", other.map(|r| r.len())),
        }
        match crashed {
            Err(e @ MapError::PartitionScan { .. }) => {
                assert!(!e.is_timeout());
                assert!(matches!(e, MapError::PartitionScan { partition_id: 9, .. }));
            }
            other => panic!("expected scan failure, got {:?}", other.map(|r| r.len())),
        }
    }

    #[tokio::test]
    async fn test_parallel_scan_on_shut_down_executor_fails() {
        let executor = Arc::new(BoundedExecutor::new("query", 2));
        executor.shutdown();
        let scan = ParallelPartitionScanExecutor::new(
            Arc::new(PartitionScanRunner::new(populated_partitions(2, 10), SerializationService)),
            executor,
            Duration::from_secs(10),
        );

        let result = scan
            .execute(
                Arc::new(Query::new(MAP, Predicate::True)),
                Arc::new(Extractors::default()),
                vec![0, 1],
            )
            .await;

        match result {
            Err(e @ MapError::PartitionScan { .. }) => assert!(!e.is_timeout()),
            other => panic!("expected scan failure, got {:?}", other.map(|r| r.len())),
        }
    }

    #[tokio::test]
    async fn test_scan_of_partition_without_store_is_empty() {
        let partitions = Arc::new((0..4).map(PartitionContainer::new).collect::<Vec<_>>());
        let runner = PartitionScanRunner::new(partitions, SerializationService);

        let scan = runner
            .run(&Query::new("nothing", Predicate::True), &Extractors::default(), 3)
            .unwrap();

        assert_eq!(scan.partition_id, 3);
        assert!(scan.rows.is_empty());
    }

    // ============================================================
    // RUNNER & ENGINE TESTS
    // ============================================================

    fn runner_with(properties: Properties, partitions: Arc<Vec<PartitionContainer>>) -> QueryRunner {
        let execution = ExecutionService::new(partitions.len() as u32, 2);
        QueryRunner::from_properties(&properties, &execution, partitions, SerializationService)
    }

    #[tokio::test]
    async fn test_iteration_types_shape_rows() {
        let runner = runner_with(Properties::new(), populated_partitions(8, 40));
        let all: Vec<u32> = (0..8).collect();
        let extractors = Arc::new(Extractors::default());

        let keys = runner
            .run(
                Query::new(MAP, Predicate::equal("__key", 3)).with_iteration_type(IterationType::Key),
                extractors.clone(),
                all.clone(),
            )
            .await
            .unwrap()
            .into_rows()
            .unwrap();
        let values = runner
            .run(
                Query::new(MAP, Predicate::equal("__key", 3)).with_iteration_type(IterationType::Value),
                extractors,
                all,
            )
            .await
            .unwrap()
            .into_rows()
            .unwrap();

        assert_eq!(keys.len(), 1);
        assert!(keys.rows[0].key.is_some() && keys.rows[0].value.is_none());
        assert_eq!(values.len(), 1);
        assert!(values.rows[0].key.is_none() && values.rows[0].value.is_some());
        assert_eq!(keys.partition_ids, (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_aggregations_serial_and_parallel_agree() {
        let partitions = populated_partitions(8, 200);
        let serial = runner_with(
            Properties::new().with(Property::AggregationAccumulationParallelEvaluation, false),
            partitions.clone(),
        );
        let parallel = runner_with(
            Properties::new()
                .with(Property::AggregationAccumulationParallelEvaluation, true)
                .with(Property::QueryPredicateParallelEvaluation, true),
            partitions,
        );
        let all: Vec<u32> = (0..8).collect();
        let cases = vec![
            (Aggregator::Count, json!(200)),
            (Aggregator::Sum("age".into()), json!(2 * (0..100).sum::<u64>())),
            (Aggregator::Avg("age".into()), json!(49.5)),
            (Aggregator::Min("age".into()), json!(0)),
            (Aggregator::Max("age".into()), json!(99)),
            (Aggregator::Distinct("address.city".into()), json!(["Las Palmas", "Madrid"])),
        ];

        for (aggregator, expected) in cases {
            for runner in [&serial, &parallel] {
                let value = runner
                    .run(
                        Query::aggregate(MAP, Predicate::True, aggregator.clone()),
                        Arc::new(Extractors::default()),
                        all.clone(),
                    )
                    .await
                    .unwrap()
                    .into_aggregate()
                    .unwrap();
                assert_eq!(value, expected, "aggregator {:?}", aggregator);
            }
        }
    }

    #[test]
    fn test_integer_sum_is_exact() {
        let big = 9_007_199_254_740_993_i64;
        let mut state = Aggregator::Sum("n".into()).new_state();
        state.accumulate(Some(json!(big)));
        let mut other = Aggregator::Sum("n".into()).new_state();
        other.accumulate(Some(json!(1)));
        state.combine(other);
        assert_eq!(state.finish(), json!(big + 1));

        let mut wide = Aggregator::Sum("n".into()).new_state();
        wide.accumulate(Some(json!(u64::MAX)));
        assert_eq!(wide.finish(), json!(u64::MAX));

        let mut mixed = Aggregator::Sum("n".into()).new_state();
        mixed.accumulate(Some(json!(1)));
        mixed.accumulate(Some(json!(0.5)));
        assert_eq!(mixed.finish(), json!(1.5));
    }

    #[tokio::test]
    async fn test_result_size_limit() {
        let runner = runner_with(
            Properties::new().with(Property::QueryResultSizeLimit, 10),
            populated_partitions(4, 50),
        );

        let result = runner
            .run(Query::new(MAP, Predicate::True), Arc::new(Extractors::default()), vec![0, 1, 2, 3])
            .await;

        assert!(matches!(result, Err(MapError::QueryResultSizeExceeded { limit: 10 })));
    }

    #[tokio::test]
    async fn test_engine_targets_owned_or_given_partitions() {
        // ARRANGE: This node owns partitions 0 and 1 only
        let partitions = populated_partitions(4, 40);
        let local = crate::cluster::types::Member::new("127.0.0.1:5701".parse().unwrap());
        let table = PartitionTable::new(4, local.clone());
        table.assign(0, local.id.clone());
        table.assign(1, local.id.clone());
        let engine = QueryEngine::new(
            runner_with(Properties::new(), partitions),
            Arc::new(OwnedPartitions::new(table)),
        );
        let extractors = Arc::new(Extractors::default());

        // ACT
        let local_result = engine
            .execute(Query::new(MAP, Predicate::True), extractors.clone(), Target::LocalNode)
            .await
            .unwrap();
        let explicit = engine
            .execute(
                Query::new(MAP, Predicate::True),
                extractors,
                Target::Partitions(PartitionIdSet::new(4, vec![3])),
            )
            .await
            .unwrap();

        // ASSERT
        assert_eq!(local_result.partition_ids(), &[0, 1]);
        assert_eq!(local_result.into_rows().unwrap().len(), 20);
        assert_eq!(explicit.partition_ids(), &[3]);
        assert_eq!(explicit.into_rows().unwrap().len(), 10);
    }
}
