//! Configuration
//!
//! Two layers, read at different times:
//!
//! - [`Config`] / [`MapConfig`]: static per-map configuration, deserialized from JSON.
//!   A map container snapshots its `MapConfig` when it is constructed, so later edits
//!   are not observed by an existing container.
//! - [`Properties`]: dynamic engine toggles (parallel evaluation, call timeout, expiry
//!   period...). Defaults can be overridden from the environment (`PMAP_<NAME>`) or set
//!   explicitly. Components read them at construction or per call.

use anyhow::{Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_PARTITION_COUNT: u32 = 271;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InMemoryFormat {
    #[default]
    Binary,
    Object,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapStoreConfig {
    pub enabled: bool,
    /// `0` means write-through, anything else buffers writes (write-behind).
    pub write_delay_seconds: u64,
}

impl MapStoreConfig {
    pub fn is_write_behind(&self) -> bool {
        self.enabled && self.write_delay_seconds > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub in_memory_format: InMemoryFormat,
    pub backup_count: u32,
    /// `0` disables TTL.
    pub time_to_live_seconds: u64,
    /// `0` disables max-idle expiry.
    pub max_idle_seconds: u64,
    pub statistics_enabled: bool,
    /// Cache read values in the near cache of this node.
    pub near_cache_enabled: bool,
    pub map_store: MapStoreConfig,
    /// Attribute alias -> dotted path inside the value (e.g. `"city": "address.city"`).
    pub attributes: HashMap<String, String>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            in_memory_format: InMemoryFormat::Binary,
            backup_count: 1,
            time_to_live_seconds: 0,
            max_idle_seconds: 0,
            statistics_enabled: true,
            near_cache_enabled: false,
            map_store: MapStoreConfig::default(),
            attributes: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub properties: HashMap<String, String>,
    pub default_map: MapConfig,
    pub maps: HashMap<String, MapConfig>,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid map service configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Returns the named map config, or the `default_map` section.
    pub fn find_map_config(&self, map_name: &str) -> MapConfig {
        self.maps
            .get(map_name)
            .cloned()
            .unwrap_or_else(|| self.default_map.clone())
    }

    pub fn with_map_config(mut self, map_name: &str, map_config: MapConfig) -> Self {
        self.maps.insert(map_name.to_string(), map_config);
        self
    }

    /// Builds [`Properties`] from defaults, then the environment, then this config's
    /// `properties` section.
    pub fn properties(&self) -> Properties {
        let properties = Properties::from_env();
        for (name, value) in &self.properties {
            match Property::from_name(name) {
                Some(property) => properties.set(property, value),
                None => tracing::warn!("Ignoring unknown property '{}'", name),
            }
        }
        properties
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    PartitionCount,
    PartitionOperationThreadCount,
    QueryThreadCount,
    QueryPredicateParallelEvaluation,
    AggregationAccumulationParallelEvaluation,
    OperationCallTimeoutMillis,
    QueryOptimizerType,
    QueryResultSizeLimit,
    IndexCopyBehavior,
    MapExpiryTaskPeriodSeconds,
    MapExpiryCleanupPercentage,
    MapExpiryCleanupMinCount,
    MapDestroyTimeoutMillis,
    MapWriteBehindQueueCapacity,
    MapWriteBehindFlushPeriodMillis,
}

impl Property {
    pub const ALL: [Property; 15] = [
        Property::PartitionCount,
        Property::PartitionOperationThreadCount,
        Property::QueryThreadCount,
        Property::QueryPredicateParallelEvaluation,
        Property::AggregationAccumulationParallelEvaluation,
        Property::OperationCallTimeoutMillis,
        Property::QueryOptimizerType,
        Property::QueryResultSizeLimit,
        Property::IndexCopyBehavior,
        Property::MapExpiryTaskPeriodSeconds,
        Property::MapExpiryCleanupPercentage,
        Property::MapExpiryCleanupMinCount,
        Property::MapDestroyTimeoutMillis,
        Property::MapWriteBehindQueueCapacity,
        Property::MapWriteBehindFlushPeriodMillis,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Property::PartitionCount => "partition.count",
            Property::PartitionOperationThreadCount => "partition.operation.thread.count",
            Property::QueryThreadCount => "query.thread.count",
            Property::QueryPredicateParallelEvaluation => "query.predicate.parallel.evaluation",
            Property::AggregationAccumulationParallelEvaluation => {
                "aggregation.accumulation.parallel.evaluation"
            }
            Property::OperationCallTimeoutMillis => "operation.call.timeout.millis",
            Property::QueryOptimizerType => "query.optimizer.type",
            Property::QueryResultSizeLimit => "query.result.size.limit",
            Property::IndexCopyBehavior => "index.copy.behavior",
            Property::MapExpiryTaskPeriodSeconds => "map.expiry.task.period.seconds",
            Property::MapExpiryCleanupPercentage => "map.expiry.cleanup.percentage",
            Property::MapExpiryCleanupMinCount => "map.expiry.cleanup.min.count",
            Property::MapDestroyTimeoutMillis => "map.destroy.timeout.millis",
            Property::MapWriteBehindQueueCapacity => "map.write.behind.queue.capacity",
            Property::MapWriteBehindFlushPeriodMillis => "map.write.behind.flush.period.millis",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            Property::PartitionCount => "271",
            Property::PartitionOperationThreadCount => "4",
            Property::QueryThreadCount => "8",
            Property::QueryPredicateParallelEvaluation => "false",
            Property::AggregationAccumulationParallelEvaluation => "true",
            Property::OperationCallTimeoutMillis => "60000",
            Property::QueryOptimizerType => "RULES",
            Property::QueryResultSizeLimit => "-1",
            Property::IndexCopyBehavior => "COPY_ON_READ",
            Property::MapExpiryTaskPeriodSeconds => "5",
            Property::MapExpiryCleanupPercentage => "10",
            Property::MapExpiryCleanupMinCount => "100",
            Property::MapDestroyTimeoutMillis => "30000",
            Property::MapWriteBehindQueueCapacity => "50000",
            Property::MapWriteBehindFlushPeriodMillis => "1000",
        }
    }

    pub fn from_name(name: &str) -> Option<Property> {
        Property::ALL.iter().copied().find(|p| p.name() == name)
    }

    /// `query.thread.count` -> `PMAP_QUERY_THREAD_COUNT`
    pub fn env_var(&self) -> String {
        format!("PMAP_{}", self.name().replace('.', "_").to_uppercase())
    }
}

/// Dynamic, typed engine properties.
#[derive(Debug, Default)]
pub struct Properties {
    overrides: DashMap<Property, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let properties = Self::new();
        for property in Property::ALL {
            if let Ok(value) = std::env::var(property.env_var()) {
                properties.set(property, &value);
            }
        }
        properties
    }

    pub fn set(&self, property: Property, value: impl ToString) {
        self.overrides.insert(property, value.to_string());
    }

    pub fn with(self, property: Property, value: impl ToString) -> Self {
        self.set(property, value);
        self
    }

    pub fn get_string(&self, property: Property) -> String {
        self.overrides
            .get(&property)
            .map(|v| v.value().clone())
            .unwrap_or_else(|| property.default_value().to_string())
    }

    pub fn get_bool(&self, property: Property) -> bool {
        self.parse_or_default(property)
    }

    pub fn get_integer(&self, property: Property) -> i64 {
        self.parse_or_default(property)
    }

    pub fn get_enum<T>(&self, property: Property) -> T
    where
        T: FromStr,
        <T as FromStr>::Err: std::fmt::Display,
    {
        self.parse_or_default(property)
    }

    fn parse_or_default<T>(&self, property: Property) -> T
    where
        T: FromStr,
        <T as FromStr>::Err: std::fmt::Display,
    {
        let raw = self.get_string(property);
        match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    "Invalid value '{}' for property {}: {}, using default",
                    raw,
                    property.name(),
                    e
                );
                match property.default_value().parse::<T>() {
                    Ok(value) => value,
                    Err(_) => unreachable!("default of {} must parse", property.name()),
                }
            }
        }
    }
}

/// How query results taken from indexes are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexCopyBehavior {
    CopyOnRead,
    CopyOnWrite,
    Never,
}

impl FromStr for IndexCopyBehavior {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COPY_ON_READ" => Ok(IndexCopyBehavior::CopyOnRead),
            "COPY_ON_WRITE" => Ok(IndexCopyBehavior::CopyOnWrite),
            "NEVER" => Ok(IndexCopyBehavior::Never),
            other => Err(format!("unknown index copy behavior {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOptimizerType {
    Rules,
    None,
}

impl FromStr for QueryOptimizerType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RULES" => Ok(QueryOptimizerType::Rules),
            "NONE" => Ok(QueryOptimizerType::None),
            other => Err(format!("unknown query optimizer type {}", other)),
        }
    }
}
