//! Aggregations over query results.
//!
//! Every partition's rows are accumulated into an [`AggregationState`] independently, then
//! the partial states are combined. Accumulation runs on the caller or in parallel on the
//! `query` executor, independently of how the scan itself was run.

use super::extractors::Extractors;
use super::predicate::compare;
use super::result::PartitionScanResult;
use super::scan::collect_within;
use crate::error::{MapError, MapResult};
use crate::executor::service::BoundedExecutor;
use crate::storage::serialization::{Data, SerializationService, Value};

use async_trait::async_trait;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregator {
    Count,
    Sum(String),
    Avg(String),
    Min(String),
    Max(String),
    Distinct(String),
}

impl Aggregator {
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Aggregator::Count => None,
            Aggregator::Sum(a)
            | Aggregator::Avg(a)
            | Aggregator::Min(a)
            | Aggregator::Max(a)
            | Aggregator::Distinct(a) => Some(a),
        }
    }

    pub fn new_state(&self) -> AggregationState {
        match self {
            Aggregator::Count => AggregationState::Count(0),
            Aggregator::Sum(_) => AggregationState::Sum {
                exact: Some(0),
                total: 0.0,
            },
            Aggregator::Avg(_) => AggregationState::Avg { sum: 0.0, count: 0 },
            Aggregator::Min(_) => AggregationState::Min(None),
            Aggregator::Max(_) => AggregationState::Max(None),
            Aggregator::Distinct(_) => AggregationState::Distinct(BTreeMap::new()),
        }
    }
}

/// Partial result of an aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationState {
    Count(u64),
    /// `exact` is kept while every value is an integer and the sum fits, `total` always.
    Sum { exact: Option<i128>, total: f64 },
    Avg { sum: f64, count: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
    /// Keyed by the value's JSON text for a stable order.
    Distinct(BTreeMap<String, Value>),
}

impl AggregationState {
    /// Adds one entry. `value` is the extracted attribute, `None` when the entry lacks it.
    /// Non-numeric values are ignored by `Sum` and `Avg`.
    pub fn accumulate(&mut self, value: Option<Value>) {
        match self {
            AggregationState::Count(count) => *count += 1,
            AggregationState::Sum { exact, total } => {
                if let Some(Value::Number(n)) = value {
                    let integer = n
                        .as_i64()
                        .map(i128::from)
                        .or_else(|| n.as_u64().map(i128::from));
                    *exact = (*exact).zip(integer).and_then(|(sum, next)| sum.checked_add(next));
                    *total += n.as_f64().unwrap_or(0.0);
                }
            }
            AggregationState::Avg { sum, count } => {
                if let Some(n) = value.as_ref().and_then(Value::as_f64) {
                    *sum += n;
                    *count += 1;
                }
            }
            AggregationState::Min(current) => keep_if(current, value, Ordering::Less),
            AggregationState::Max(current) => keep_if(current, value, Ordering::Greater),
            AggregationState::Distinct(seen) => {
                if let Some(v) = value {
                    seen.insert(v.to_string(), v);
                }
            }
        }
    }

    pub fn combine(&mut self, other: AggregationState) {
        match (self, other) {
            (AggregationState::Count(a), AggregationState::Count(b)) => *a += b,
            (
                AggregationState::Sum { exact, total },
                AggregationState::Sum {
                    exact: other_exact,
                    total: other_total,
                },
            ) => {
                *exact = (*exact).zip(other_exact).and_then(|(a, b)| a.checked_add(b));
                *total += other_total;
            }
            (
                AggregationState::Avg { sum, count },
                AggregationState::Avg {
                    sum: other_sum,
                    count: other_count,
                },
            ) => {
                *sum += other_sum;
                *count += other_count;
            }
            (AggregationState::Min(current), AggregationState::Min(other)) => {
                keep_if(current, other, Ordering::Less)
            }
            (AggregationState::Max(current), AggregationState::Max(other)) => {
                keep_if(current, other, Ordering::Greater)
            }
            (AggregationState::Distinct(seen), AggregationState::Distinct(other)) => {
                seen.extend(other)
            }
            (state, other) => {
                tracing::error!("Cannot combine {:?} with {:?}", state, other);
            }
        }
    }

    pub fn finish(self) -> Value {
        match self {
            AggregationState::Count(count) => json!(count),
            AggregationState::Sum { exact, total } => match exact {
                Some(sum) => i64::try_from(sum)
                    .map(|sum| json!(sum))
                    .or_else(|_| u64::try_from(sum).map(|sum| json!(sum)))
                    .unwrap_or_else(|_| json!(total)),
                None => json!(total),
            },
            AggregationState::Avg { count: 0, .. } => Value::Null,
            AggregationState::Avg { sum, count } => json!(sum / count as f64),
            AggregationState::Min(value) | AggregationState::Max(value) => {
                value.unwrap_or(Value::Null)
            }
            AggregationState::Distinct(seen) => Value::Array(seen.into_values().collect()),
        }
    }
}

fn keep_if(current: &mut Option<Value>, candidate: Option<Value>, wanted: Ordering) {
    let Some(candidate) = candidate else {
        return;
    };
    let replace = match current.as_ref() {
        None => true,
        Some(existing) => compare(&candidate, existing) == Some(wanted),
    };
    if replace {
        *current = Some(candidate);
    }
}

/// Accumulates the rows of one partition.
pub fn accumulate_partition(
    aggregator: &Aggregator,
    extractors: &Extractors,
    ss: &SerializationService,
    scan: &PartitionScanResult,
) -> MapResult<AggregationState> {
    let mut state = aggregator.new_state();
    let decode = |data: &Option<Data>| -> MapResult<Value> {
        match data {
            Some(data) => ss.to_object(data).map_err(|e| MapError::PartitionScan {
                partition_id: scan.partition_id,
                source: e.into(),
            }),
            None => Ok(Value::Null),
        }
    };

    for row in &scan.rows {
        match aggregator.attribute() {
            None => state.accumulate(None),
            Some(attribute) => {
                let key = decode(&row.key)?;
                let value = decode(&row.value)?;
                state.accumulate(extractors.extract(attribute, &key, &value));
            }
        }
    }
    Ok(state)
}

#[async_trait]
pub trait AccumulationExecutor: Send + Sync {
    async fn accumulate(
        &self,
        map_name: &str,
        aggregator: Aggregator,
        extractors: Arc<Extractors>,
        scans: Vec<PartitionScanResult>,
    ) -> MapResult<AggregationState>;
}

pub struct CallerRunsAccumulationExecutor {
    ss: SerializationService,
}

impl CallerRunsAccumulationExecutor {
    pub fn new(ss: SerializationService) -> Self {
        Self { ss }
    }
}

#[async_trait]
impl AccumulationExecutor for CallerRunsAccumulationExecutor {
    async fn accumulate(
        &self,
        _map_name: &str,
        aggregator: Aggregator,
        extractors: Arc<Extractors>,
        scans: Vec<PartitionScanResult>,
    ) -> MapResult<AggregationState> {
        let mut result = aggregator.new_state();
        for scan in &scans {
            result.combine(accumulate_partition(&aggregator, &extractors, &self.ss, scan)?);
        }
        Ok(result)
    }
}

pub struct ParallelAccumulationExecutor {
    executor: Arc<BoundedExecutor>,
    ss: SerializationService,
    timeout: Duration,
}

impl ParallelAccumulationExecutor {
    pub fn new(executor: Arc<BoundedExecutor>, ss: SerializationService, timeout: Duration) -> Self {
        Self {
            executor,
            ss,
            timeout,
        }
    }
}

#[async_trait]
impl AccumulationExecutor for ParallelAccumulationExecutor {
    async fn accumulate(
        &self,
        map_name: &str,
        aggregator: Aggregator,
        extractors: Arc<Extractors>,
        scans: Vec<PartitionScanResult>,
    ) -> MapResult<AggregationState> {
        let tasks = scans
            .into_iter()
            .map(|scan| {
                let partition_id = scan.partition_id;
                let aggregator = aggregator.clone();
                let extractors = extractors.clone();
                let ss = self.ss;
                let handle = self.executor.submit(move || {
                    accumulate_partition(&aggregator, &extractors, &ss, &scan)
                });
                (partition_id, handle)
            })
            .collect();

        let mut result = aggregator.new_state();
        for partial in collect_within(map_name, self.timeout, tasks).await? {
            result.combine(partial);
        }
        Ok(result)
    }
}
