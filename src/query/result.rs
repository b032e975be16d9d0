//! Query results and the processors that build them from partition scans.

use super::aggregation::{AccumulationExecutor, Aggregator};
use super::extractors::Extractors;
use super::{Query, QueryResultKind};
use crate::error::{MapError, MapResult};
use crate::storage::serialization::{Data, Value};

use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryResultRow {
    /// Present for key and entry iteration.
    pub key: Option<Data>,
    /// Present for value and entry iteration.
    pub value: Option<Data>,
}

/// Rows produced by scanning one partition.
#[derive(Debug, Clone)]
pub struct PartitionScanResult {
    pub partition_id: u32,
    pub rows: Vec<QueryResultRow>,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub rows: Vec<QueryResultRow>,
    /// Partitions that contributed. A caller comparing this with the partitions it expected
    /// can detect a migration that happened mid-query.
    pub partition_ids: Vec<u32>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AggregationResult {
    pub value: Value,
    pub partition_ids: Vec<u32>,
}

#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Rows(QueryResult),
    Aggregate(AggregationResult),
}

impl QueryOutcome {
    pub fn partition_ids(&self) -> &[u32] {
        match self {
            QueryOutcome::Rows(result) => &result.partition_ids,
            QueryOutcome::Aggregate(result) => &result.partition_ids,
        }
    }

    pub fn into_rows(self) -> Option<QueryResult> {
        match self {
            QueryOutcome::Rows(result) => Some(result),
            QueryOutcome::Aggregate(_) => None,
        }
    }

    pub fn into_aggregate(self) -> Option<Value> {
        match self {
            QueryOutcome::Aggregate(result) => Some(result.value),
            QueryOutcome::Rows(_) => None,
        }
    }
}

/// Merges per-partition scans into the final result of one result kind.
#[async_trait]
pub trait ResultProcessor: Send + Sync {
    async fn populate(
        &self,
        query: &Query,
        extractors: Arc<Extractors>,
        scans: Vec<PartitionScanResult>,
    ) -> MapResult<QueryOutcome>;
}

pub struct QueryResultProcessor {
    /// `None` disables the limit.
    result_size_limit: Option<usize>,
}

impl QueryResultProcessor {
    pub fn new(result_size_limit: Option<usize>) -> Self {
        Self { result_size_limit }
    }
}

#[async_trait]
impl ResultProcessor for QueryResultProcessor {
    async fn populate(
        &self,
        _query: &Query,
        _extractors: Arc<Extractors>,
        scans: Vec<PartitionScanResult>,
    ) -> MapResult<QueryOutcome> {
        let total: usize = scans.iter().map(|scan| scan.rows.len()).sum();
        if let Some(limit) = self.result_size_limit {
            if total > limit {
                return Err(MapError::QueryResultSizeExceeded { limit });
            }
        }

        let mut rows = Vec::with_capacity(total);
        let mut partition_ids = Vec::with_capacity(scans.len());
        for scan in scans {
            partition_ids.push(scan.partition_id);
            rows.extend(scan.rows);
        }
        partition_ids.sort_unstable();

        Ok(QueryOutcome::Rows(QueryResult { rows, partition_ids }))
    }
}

pub struct AggregationResultProcessor {
    accumulation: Arc<dyn AccumulationExecutor>,
}

impl AggregationResultProcessor {
    pub fn new(accumulation: Arc<dyn AccumulationExecutor>) -> Self {
        Self { accumulation }
    }
}

#[async_trait]
impl ResultProcessor for AggregationResultProcessor {
    async fn populate(
        &self,
        query: &Query,
        extractors: Arc<Extractors>,
        scans: Vec<PartitionScanResult>,
    ) -> MapResult<QueryOutcome> {
        let aggregator = match &query.result {
            QueryResultKind::Aggregate(aggregator) => aggregator.clone(),
            QueryResultKind::Rows => Aggregator::Count,
        };

        let mut partition_ids: Vec<u32> = scans.iter().map(|scan| scan.partition_id).collect();
        partition_ids.sort_unstable();

        let state = self
            .accumulation
            .accumulate(&query.map_name, aggregator, extractors, scans)
            .await?;

        Ok(QueryOutcome::Aggregate(AggregationResult {
            value: state.finish(),
            partition_ids,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Rows,
    Aggregation,
}

/// Result processor per declared result kind.
pub struct ResultProcessorRegistry {
    rows: Arc<dyn ResultProcessor>,
    aggregation: Arc<dyn ResultProcessor>,
}

impl ResultProcessorRegistry {
    pub fn new(rows: Arc<dyn ResultProcessor>, aggregation: Arc<dyn ResultProcessor>) -> Self {
        Self { rows, aggregation }
    }

    pub fn register(&mut self, kind: ResultKind, processor: Arc<dyn ResultProcessor>) {
        match kind {
            ResultKind::Rows => self.rows = processor,
            ResultKind::Aggregation => self.aggregation = processor,
        }
    }

    pub fn processor(&self, kind: ResultKind) -> Arc<dyn ResultProcessor> {
        match kind {
            ResultKind::Rows => self.rows.clone(),
            ResultKind::Aggregation => self.aggregation.clone(),
        }
    }
}
