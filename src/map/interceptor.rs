//! Interceptor Chain
//!
//! Interceptors see application values, never wire bytes. The `intercept_*` hooks are folded
//! left to right in registration order: each one gets the running value, and a `Some` return
//! replaces it for the rest of the chain. `None` keeps the running value, so the chain can
//! never turn a present value into an absent one. The `after_*` hooks are notified in order.

use crate::storage::serialization::Value;

use std::sync::{Arc, RwLock};
use uuid::Uuid;

pub trait MapInterceptor: Send + Sync {
    fn intercept_get(&self, _value: Option<&Value>) -> Option<Value> {
        None
    }

    fn after_get(&self, _value: Option<&Value>) {}

    fn intercept_put(&self, _old_value: Option<&Value>, _new_value: &Value) -> Option<Value> {
        None
    }

    fn after_put(&self, _value: &Value) {}

    fn intercept_remove(&self, _removed: Option<&Value>) -> Option<Value> {
        None
    }

    fn after_remove(&self, _removed: Option<&Value>) {}
}

pub fn generate_interceptor_id() -> String {
    format!("interceptor-{}", Uuid::new_v4())
}

/// Ordered interceptors of one map.
#[derive(Default)]
pub struct InterceptorRegistry {
    interceptors: RwLock<Vec<(String, Arc<dyn MapInterceptor>)>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the interceptor. An id that is already registered is left untouched.
    pub fn register(&self, id: &str, interceptor: Arc<dyn MapInterceptor>) -> bool {
        let mut interceptors = self.write();
        if interceptors.iter().any(|(existing, _)| existing == id) {
            return false;
        }
        interceptors.push((id.to_string(), interceptor));
        true
    }

    pub fn deregister(&self, id: &str) -> bool {
        let mut interceptors = self.write();
        let before = interceptors.len();
        interceptors.retain(|(existing, _)| existing != id);
        before != interceptors.len()
    }

    /// Snapshot in registration order.
    pub fn interceptors(&self) -> Vec<Arc<dyn MapInterceptor>> {
        self.read()
            .iter()
            .map(|(_, interceptor)| interceptor.clone())
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.read().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn intercept_get(&self, value: Option<Value>) -> Option<Value> {
        intercept_get(&self.interceptors(), value)
    }

    pub fn intercept_put(&self, old_value: Option<&Value>, new_value: Value) -> Value {
        intercept_put(&self.interceptors(), old_value, new_value)
    }

    pub fn intercept_remove(&self, removed: Option<Value>) -> Option<Value> {
        intercept_remove(&self.interceptors(), removed)
    }

    pub fn after_get(&self, value: Option<&Value>) {
        self.interceptors().iter().for_each(|i| i.after_get(value));
    }

    pub fn after_put(&self, value: &Value) {
        self.interceptors().iter().for_each(|i| i.after_put(value));
    }

    pub fn after_remove(&self, removed: Option<&Value>) {
        self.interceptors().iter().for_each(|i| i.after_remove(removed));
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<(String, Arc<dyn MapInterceptor>)>> {
        self.interceptors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<(String, Arc<dyn MapInterceptor>)>> {
        self.interceptors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Returns the last replacement, or `value` when nobody replaced it.
pub fn intercept_get(interceptors: &[Arc<dyn MapInterceptor>], value: Option<Value>) -> Option<Value> {
    interceptors.iter().fold(value, |running, interceptor| {
        interceptor.intercept_get(running.as_ref()).or(running)
    })
}

pub fn intercept_put(
    interceptors: &[Arc<dyn MapInterceptor>],
    old_value: Option<&Value>,
    new_value: Value,
) -> Value {
    interceptors.iter().fold(new_value, |running, interceptor| {
        interceptor
            .intercept_put(old_value, &running)
            .unwrap_or(running)
    })
}

pub fn intercept_remove(interceptors: &[Arc<dyn MapInterceptor>], removed: Option<Value>) -> Option<Value> {
    interceptors.iter().fold(removed, |running, interceptor| {
        interceptor.intercept_remove(running.as_ref()).or(running)
    })
}
