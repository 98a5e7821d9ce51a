use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a node (transport segment) inside a [`Line`](crate::line::Line).
    pub struct NodeId;

    /// Identifies a spawner (feeder source) inside a line.
    pub struct SpawnerId;

    /// Identifies an approach-zone inflow counter.
    pub struct ZoneId;
}

/// Stable numeric graph vertex of a node. Consumed by external graph and
/// reward collaborators; survives independently of arena keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Vertex(pub u32);

/// Identifies a single item travelling through the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

/// Index of a physical slot inside a [`SlotQueue`](crate::queue::SlotQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub u32);
