//! Query predicates.
//!
//! Predicates are evaluated against deserialized entries. Attributes resolve through the
//! map's [`Extractors`]; a missing attribute never matches a comparison.

use super::extractors::Extractors;
use crate::storage::serialization::Value;

use regex::Regex;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub enum Predicate {
    True,
    False,
    Equal(String, Value),
    NotEqual(String, Value),
    GreaterThan(String, Value),
    GreaterEqual(String, Value),
    LessThan(String, Value),
    LessEqual(String, Value),
    /// Inclusive on both ends.
    Between(String, Value, Value),
    In(String, Vec<Value>),
    Like {
        attribute: String,
        pattern: String,
        regex: Regex,
    },
    Regex {
        attribute: String,
        regex: Regex,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn equal(attribute: &str, value: impl Into<Value>) -> Self {
        Predicate::Equal(attribute.to_string(), value.into())
    }

    pub fn not_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Predicate::NotEqual(attribute.to_string(), value.into())
    }

    pub fn greater_than(attribute: &str, value: impl Into<Value>) -> Self {
        Predicate::GreaterThan(attribute.to_string(), value.into())
    }

    pub fn greater_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Predicate::GreaterEqual(attribute.to_string(), value.into())
    }

    pub fn less_than(attribute: &str, value: impl Into<Value>) -> Self {
        Predicate::LessThan(attribute.to_string(), value.into())
    }

    pub fn less_equal(attribute: &str, value: impl Into<Value>) -> Self {
        Predicate::LessEqual(attribute.to_string(), value.into())
    }

    pub fn between(attribute: &str, from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Predicate::Between(attribute.to_string(), from.into(), to.into())
    }

    pub fn is_in(attribute: &str, values: Vec<Value>) -> Self {
        Predicate::In(attribute.to_string(), values)
    }

    /// SQL `LIKE`: `%` matches any run of characters, `_` exactly one.
    pub fn like(attribute: &str, pattern: &str) -> Result<Self, regex::Error> {
        let mut translated = String::with_capacity(pattern.len() + 2);
        translated.push('^');
        for c in pattern.chars() {
            match c {
                '%' => translated.push_str(".*"),
                '_' => translated.push('.'),
                other => translated.push_str(&regex::escape(&other.to_string())),
            }
        }
        translated.push('$');
        Ok(Predicate::Like {
            attribute: attribute.to_string(),
            pattern: pattern.to_string(),
            regex: Regex::new(&translated)?,
        })
    }

    /// Matches when the whole attribute string matches `pattern`.
    pub fn regex(attribute: &str, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Predicate::Regex {
            attribute: attribute.to_string(),
            regex: Regex::new(&format!("^(?:{})$", pattern))?,
        })
    }

    pub fn and(predicates: Vec<Predicate>) -> Self {
        Predicate::And(predicates)
    }

    pub fn or(predicates: Vec<Predicate>) -> Self {
        Predicate::Or(predicates)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    pub fn apply(&self, key: &Value, value: &Value, extractors: &Extractors) -> bool {
        let read = |attribute: &str| extractors.extract(attribute, key, value);

        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::Equal(attr, expected) => read(attr).is_some_and(|v| values_equal(&v, expected)),
            Predicate::NotEqual(attr, expected) => {
                read(attr).is_none_or(|v| !values_equal(&v, expected))
            }
            Predicate::GreaterThan(attr, bound) => {
                compare_attr(read(attr), bound, |o| o == Ordering::Greater)
            }
            Predicate::GreaterEqual(attr, bound) => {
                compare_attr(read(attr), bound, |o| o != Ordering::Less)
            }
            Predicate::LessThan(attr, bound) => {
                compare_attr(read(attr), bound, |o| o == Ordering::Less)
            }
            Predicate::LessEqual(attr, bound) => {
                compare_attr(read(attr), bound, |o| o != Ordering::Greater)
            }
            Predicate::Between(attr, from, to) => match read(attr) {
                Some(v) => {
                    matches!(compare(&v, from), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(compare(&v, to), Some(Ordering::Less | Ordering::Equal))
                }
                None => false,
            },
            Predicate::In(attr, candidates) => read(attr)
                .is_some_and(|v| candidates.iter().any(|c| values_equal(&v, c))),
            Predicate::Like {
                attribute, regex, ..
            }
            | Predicate::Regex { attribute, regex } => match read(attribute) {
                Some(Value::String(s)) => regex.is_match(&s),
                _ => false,
            },
            Predicate::And(predicates) => predicates.iter().all(|p| p.apply(key, value, extractors)),
            Predicate::Or(predicates) => predicates.iter().any(|p| p.apply(key, value, extractors)),
            Predicate::Not(inner) => !inner.apply(key, value, extractors),
        }
    }
}

fn compare_attr(actual: Option<Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    actual
        .and_then(|v| compare(&v, bound))
        .is_some_and(accept)
}

/// Numbers compare numerically regardless of integer/float representation.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => compare(left, right) == Some(Ordering::Equal),
        _ => left == right,
    }
}

/// Ordering between values of the same kind; `None` when they are not comparable.
pub(crate) fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
        },
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
