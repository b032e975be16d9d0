//! Query Execution Module
//!
//! Scatter-gather queries over the partitions of one map.
//!
//! ## Pipeline
//! 1. **Engine**: resolves the target (all locally owned partitions, or an explicit set).
//! 2. **Runner**: optimizes the predicate, then scans each partition with the configured
//!    strategy (on the caller, or in parallel on the bounded `query` executor with a per-task
//!    timeout).
//! 3. **Result processor**: picked by the declared result kind. Row queries are merged into a
//!    [`QueryResult`](result::QueryResult); aggregations are accumulated per partition and
//!    combined.
//!
//! A timed out partition task fails the whole query. A failed partition scan is reported as is;
//! retrying after a migration is up to the caller, who can compare the reported partition ids
//! with the ones it expected.

pub mod aggregation;
pub mod engine;
pub mod extractors;
pub mod optimizer;
pub mod predicate;
pub mod result;
pub mod scan;

use crate::cluster::ownership::PartitionIdSet;
use aggregation::Aggregator;
use predicate::Predicate;
use result::ResultKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationType {
    Key,
    Value,
    Entry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResultKind {
    Rows,
    Aggregate(Aggregator),
}

#[derive(Debug, Clone)]
pub struct Query {
    pub map_name: String,
    pub predicate: Predicate,
    pub iteration_type: IterationType,
    pub result: QueryResultKind,
}

impl Query {
    /// A row query returning entries.
    pub fn new(map_name: &str, predicate: Predicate) -> Self {
        Self {
            map_name: map_name.to_string(),
            predicate,
            iteration_type: IterationType::Entry,
            result: QueryResultKind::Rows,
        }
    }

    pub fn aggregate(map_name: &str, predicate: Predicate, aggregator: Aggregator) -> Self {
        Self {
            map_name: map_name.to_string(),
            predicate,
            iteration_type: IterationType::Entry,
            result: QueryResultKind::Aggregate(aggregator),
        }
    }

    pub fn with_iteration_type(mut self, iteration_type: IterationType) -> Self {
        self.iteration_type = iteration_type;
        self
    }

    pub fn result_kind(&self) -> ResultKind {
        match self.result {
            QueryResultKind::Rows => ResultKind::Rows,
            QueryResultKind::Aggregate(_) => ResultKind::Aggregation,
        }
    }

    /// Aggregations need both key and value regardless of the requested iteration type.
    pub fn effective_iteration_type(&self) -> IterationType {
        match self.result {
            QueryResultKind::Rows => self.iteration_type,
            QueryResultKind::Aggregate(_) => IterationType::Entry,
        }
    }
}

/// Which partitions a query runs on.
#[derive(Debug, Clone)]
pub enum Target {
    /// Every partition this node currently owns.
    LocalNode,
    Partitions(PartitionIdSet),
}

#[cfg(test)]
mod tests;
