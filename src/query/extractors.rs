//! Attribute extraction for predicates, aggregators and query filters.

use crate::storage::serialization::Value;

use std::collections::HashMap;

pub const KEY_ATTRIBUTE: &str = "__key";
pub const THIS_ATTRIBUTE: &str = "this";

/// Resolves attribute names against an entry.
///
/// - `__key` is the key, `__key.a.b` a path into the key.
/// - `this` is the whole value.
/// - A configured alias maps to a path.
/// - Anything else is a dotted path into the value (`address.city`, `tags.0`).
#[derive(Debug, Clone, Default)]
pub struct Extractors {
    aliases: HashMap<String, String>,
}

impl Extractors {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn extract(&self, attribute: &str, key: &Value, value: &Value) -> Option<Value> {
        let attribute = self
            .aliases
            .get(attribute)
            .map(String::as_str)
            .unwrap_or(attribute);

        if attribute == THIS_ATTRIBUTE {
            return Some(value.clone());
        }
        if attribute == KEY_ATTRIBUTE {
            return Some(key.clone());
        }
        if let Some(path) = attribute.strip_prefix("__key.") {
            return walk(key, path).cloned();
        }
        let path = attribute.strip_prefix("this.").unwrap_or(attribute);
        walk(value, path).cloned()
    }
}

fn walk<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(fields) => fields.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
