use super::aggregation::{
    AccumulationExecutor, CallerRunsAccumulationExecutor, ParallelAccumulationExecutor,
};
use super::extractors::Extractors;
use super::optimizer::{QueryOptimizer, new_optimizer};
use super::result::{
    AggregationResultProcessor, QueryOutcome, QueryResultProcessor, ResultProcessorRegistry,
};
use super::scan::{
    CallerRunsPartitionScanExecutor, ParallelPartitionScanExecutor, PartitionScanExecutor,
    PartitionScanRunner,
};
use super::{Query, Target};
use crate::cluster::ownership::OwnedPartitions;
use crate::config::{Properties, Property, QueryOptimizerType};
use crate::error::MapResult;
use crate::executor::service::{ExecutionService, QUERY_EXECUTOR};
use crate::storage::partition_container::PartitionContainer;
use crate::storage::serialization::SerializationService;

use std::sync::Arc;
use std::time::Duration;

/// Optimizes a query, scans the given partitions and hands the scans to the result processor.
///
/// The scan and accumulation strategies are chosen once, from the properties seen at
/// construction.
pub struct QueryRunner {
    optimizer: Arc<dyn QueryOptimizer>,
    scan_executor: Arc<dyn PartitionScanExecutor>,
    processors: ResultProcessorRegistry,
}

impl QueryRunner {
    pub fn new(
        optimizer: Arc<dyn QueryOptimizer>,
        scan_executor: Arc<dyn PartitionScanExecutor>,
        processors: ResultProcessorRegistry,
    ) -> Self {
        Self {
            optimizer,
            scan_executor,
            processors,
        }
    }

    pub fn from_properties(
        properties: &Properties,
        execution: &ExecutionService,
        partitions: Arc<Vec<PartitionContainer>>,
        ss: SerializationService,
    ) -> Self {
        let timeout = Duration::from_millis(
            properties
                .get_integer(Property::OperationCallTimeoutMillis)
                .max(1) as u64,
        );
        let pool_size = properties.get_integer(Property::QueryThreadCount).max(1) as usize;
        let query_executor = execution.get_or_create_executor(QUERY_EXECUTOR, pool_size);
        let runner = Arc::new(PartitionScanRunner::new(partitions, ss));

        let scan_executor: Arc<dyn PartitionScanExecutor> =
            if properties.get_bool(Property::QueryPredicateParallelEvaluation) {
                Arc::new(ParallelPartitionScanExecutor::new(
                    runner,
                    query_executor.clone(),
                    timeout,
                ))
            } else {
                Arc::new(CallerRunsPartitionScanExecutor::new(runner))
            };

        let accumulation: Arc<dyn AccumulationExecutor> =
            if properties.get_bool(Property::AggregationAccumulationParallelEvaluation) {
                Arc::new(ParallelAccumulationExecutor::new(query_executor, ss, timeout))
            } else {
                Arc::new(CallerRunsAccumulationExecutor::new(ss))
            };

        let limit = properties.get_integer(Property::QueryResultSizeLimit);
        let processors = ResultProcessorRegistry::new(
            Arc::new(QueryResultProcessor::new((limit >= 0).then_some(limit as usize))),
            Arc::new(AggregationResultProcessor::new(accumulation)),
        );

        let optimizer_type: QueryOptimizerType = properties.get_enum(Property::QueryOptimizerType);
        tracing::debug!(
            "Query runner: parallel scan={}, optimizer={:?}, timeout={:?}",
            properties.get_bool(Property::QueryPredicateParallelEvaluation),
            optimizer_type,
            timeout
        );

        Self::new(new_optimizer(optimizer_type), scan_executor, processors)
    }

    pub async fn run(
        &self,
        query: Query,
        extractors: Arc<Extractors>,
        partitions: Vec<u32>,
    ) -> MapResult<QueryOutcome> {
        let Query {
            map_name,
            predicate,
            iteration_type,
            result,
        } = query;
        let query = Arc::new(Query {
            map_name,
            predicate: self.optimizer.optimize(predicate),
            iteration_type,
            result,
        });

        let processor = self.processors.processor(query.result_kind());

        let scans = self
            .scan_executor
            .execute(query.clone(), extractors.clone(), partitions)
            .await?;

        processor.populate(&query, extractors, scans).await
    }
}

/// Entry point for queries: resolves the target partitions and delegates to the runner.
pub struct QueryEngine {
    runner: QueryRunner,
    owned_partitions: Arc<OwnedPartitions>,
}

impl QueryEngine {
    pub fn new(runner: QueryRunner, owned_partitions: Arc<OwnedPartitions>) -> Self {
        Self {
            runner,
            owned_partitions,
        }
    }

    pub async fn execute(
        &self,
        query: Query,
        extractors: Arc<Extractors>,
        target: Target,
    ) -> MapResult<QueryOutcome> {
        let partitions = match target {
            Target::LocalNode => self.owned_partitions.get().to_vec(),
            Target::Partitions(set) => set.to_vec(),
        };
        tracing::debug!(
            "Executing query on map '{}' over {} partitions",
            query.map_name,
            partitions.len()
        );
        self.runner.run(query, extractors, partitions).await
    }
}
