use super::types::EntryEventType;
use crate::query::extractors::Extractors;
use crate::query::predicate::Predicate;
use crate::storage::serialization::{Data, Value};

/// Decides whether a registration receives an event.
#[derive(Debug, Clone)]
pub enum EventFilter {
    True,
    /// Only events for this key.
    Key(Data),
    /// Evaluated against the new value, or the old value for removals.
    Query(Predicate),
    /// Listener capability mask wrapped around the caller's filter.
    Listener { flags: u32, inner: Box<EventFilter> },
    /// Accepts partition-lost events only.
    PartitionLost,
}

/// The pieces of an entry event a filter may look at.
pub struct EntryFilterContext<'a> {
    pub event_type: EntryEventType,
    pub key_data: &'a Data,
    pub key: &'a Value,
    pub old_value: Option<&'a Value>,
    pub value: Option<&'a Value>,
    pub extractors: &'a Extractors,
}

impl EventFilter {
    pub fn with_flags(flags: u32, inner: EventFilter) -> Self {
        EventFilter::Listener {
            flags,
            inner: Box::new(inner),
        }
    }

    /// Cheap check done before any event is built: only the capability mask is consulted.
    pub fn is_interested_in(&self, event_type: EntryEventType) -> bool {
        match self {
            EventFilter::Listener { flags, inner } => {
                flags & event_type.mask() != 0 && inner.is_interested_in(event_type)
            }
            EventFilter::PartitionLost => false,
            _ => true,
        }
    }

    pub fn eval_entry(&self, context: &EntryFilterContext<'_>) -> bool {
        match self {
            EventFilter::True => true,
            EventFilter::Key(key) => key == context.key_data,
            EventFilter::Query(predicate) => {
                let subject = if context.event_type.is_removal() {
                    context.old_value
                } else {
                    context.value.or(context.old_value)
                };
                subject.is_some_and(|value| predicate.apply(context.key, value, context.extractors))
            }
            EventFilter::Listener { flags, inner } => {
                flags & context.event_type.mask() != 0 && inner.eval_entry(context)
            }
            EventFilter::PartitionLost => false,
        }
    }

    pub fn accepts_partition_lost(&self) -> bool {
        matches!(self, EventFilter::PartitionLost)
    }
}
