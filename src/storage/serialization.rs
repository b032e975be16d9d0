//! Serialization boundary.
//!
//! Record stores keep keys and values in wire form ([`Data`]). Everything user-facing
//! (interceptors, predicates, comparators, listeners) works on application values
//! ([`Value`]), converted with [`SerializationService::to_object`] / [`SerializationService::to_data`].

use crate::config::InMemoryFormat;
use crate::error::MapResult;

use std::fmt;
use std::sync::Arc;

pub type Value = serde_json::Value;

/// Opaque wire representation. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Data(Arc<[u8]>);

impl Data {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into().into_boxed_slice()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => write!(f, "Data({})", text),
            Err(_) => write!(f, "Data({} bytes)", self.0.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SerializationService;

impl SerializationService {
    pub fn to_data(&self, value: &Value) -> MapResult<Data> {
        Ok(Data::from_bytes(serde_json::to_vec(value)?))
    }

    pub fn to_object(&self, data: &Data) -> MapResult<Value> {
        Ok(serde_json::from_slice(data.as_bytes())?)
    }
}

/// Equality of stored values, chosen by the map's in-memory format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueComparator {
    /// Compares wire bytes.
    Binary,
    /// Compares deserialized values.
    Object,
}

impl ValueComparator {
    pub fn of(format: InMemoryFormat) -> Self {
        match format {
            InMemoryFormat::Binary => ValueComparator::Binary,
            InMemoryFormat::Object => ValueComparator::Object,
        }
    }

    pub fn is_equal(&self, left: &Data, right: &Data, ss: &SerializationService) -> bool {
        match self {
            ValueComparator::Binary => left == right,
            ValueComparator::Object => match (ss.to_object(left), ss.to_object(right)) {
                (Ok(l), Ok(r)) => l == r,
                _ => left == right,
            },
        }
    }
}
