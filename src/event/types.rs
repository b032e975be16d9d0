use crate::cluster::types::NodeId;
use crate::storage::serialization::Value;

/// Kind of an entry event. Each kind is one bit of a listener's capability mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryEventType {
    Added,
    Removed,
    Updated,
    Evicted,
    Expired,
    EvictAll,
    ClearAll,
    Merged,
    Loaded,
}

impl EntryEventType {
    pub const ALL: [EntryEventType; 9] = [
        EntryEventType::Added,
        EntryEventType::Removed,
        EntryEventType::Updated,
        EntryEventType::Evicted,
        EntryEventType::Expired,
        EntryEventType::EvictAll,
        EntryEventType::ClearAll,
        EntryEventType::Merged,
        EntryEventType::Loaded,
    ];

    pub fn mask(self) -> u32 {
        match self {
            EntryEventType::Added => 1,
            EntryEventType::Removed => 1 << 1,
            EntryEventType::Updated => 1 << 2,
            EntryEventType::Evicted => 1 << 3,
            EntryEventType::Expired => 1 << 4,
            EntryEventType::EvictAll => 1 << 5,
            EntryEventType::ClearAll => 1 << 6,
            EntryEventType::Merged => 1 << 7,
            EntryEventType::Loaded => 1 << 8,
        }
    }

    /// Whether the event describes something that went away (filters then look at the old value).
    pub fn is_removal(self) -> bool {
        matches!(
            self,
            EntryEventType::Removed | EntryEventType::Evicted | EntryEventType::Expired
        )
    }
}

pub const ALL_EVENTS_MASK: u32 = (1 << 9) - 1;

#[derive(Debug, Clone, PartialEq)]
pub struct EntryEvent {
    pub map_name: String,
    pub event_type: EntryEventType,
    pub key: Value,
    pub old_value: Option<Value>,
    pub value: Option<Value>,
    pub partition_id: u32,
}

/// A partition of the map lost all its replicas.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPartitionLostEvent {
    pub map_name: String,
    pub partition_id: u32,
    pub member: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent {
    Entry(EntryEvent),
    PartitionLost(MapPartitionLostEvent),
}
