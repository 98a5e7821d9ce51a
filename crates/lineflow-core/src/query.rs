//! Read-only views of line state.
//!
//! Snapshots are owned copies with no references into the line, so they can
//! be serialized, diffed, or handed to an external reward or graph
//! collaborator. [`Line::observation`] flattens the per-node state into the
//! numeric vector an agent consumes.

use serde::{Deserialize, Serialize};

use crate::fixed::{Fixed64, Ticks};
use crate::id::{NodeId, Vertex};
use crate::line::Line;
use crate::node::{HoldCause, Node, NodeState};

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// A copy of one node's observable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub vertex: Vertex,
    pub state: NodeState,
    pub hold_cause: Option<HoldCause>,
    pub queue_count: u32,
    pub queue_capacity: u32,
    /// Queue fill as a 0..1 fraction; 0 for nodes without a queue.
    pub fill_ratio: Fixed64,
    /// Buffered items plus items in the node's approach zones.
    pub predicted_load: u32,
    pub upstream_hold_refs: u32,
    pub hold_sent: bool,
    pub items_since_failure: u64,
    /// Items waiting at the entrance for a free slot.
    pub waiting: u32,
    pub exits: u64,
}

/// Every node in vertex order, plus line-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub tick: Ticks,
    pub nodes: Vec<NodeSnapshot>,
    pub in_transit: u32,
    pub total_exits: u64,
    pub stray: u64,
}

impl LineSnapshot {
    #[cfg(feature = "json")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Line {
    pub fn snapshot_node(&self, id: NodeId) -> Option<NodeSnapshot> {
        let node = self.node(id)?;
        Some(NodeSnapshot {
            vertex: node.vertex(),
            state: node.state(),
            hold_cause: node.hold_cause(),
            queue_count: node.queue_count(),
            queue_capacity: node.queue_capacity(),
            fill_ratio: node.fill_ratio(),
            predicted_load: node.predicted_load(self.zones()),
            upstream_hold_refs: node.upstream_hold_refs(),
            hold_sent: node.hold_sent(),
            items_since_failure: node.items_since_failure(),
            waiting: self.waiting_at(id) as u32,
            exits: node.exit_count(),
        })
    }

    pub fn snapshot(&self) -> LineSnapshot {
        let nodes = self
            .nodes_by_vertex()
            .into_iter()
            .filter_map(|n| self.snapshot_node(n.id()))
            .collect();
        LineSnapshot {
            tick: self.current_tick(),
            nodes,
            in_transit: self.transits().len() as u32,
            total_exits: self.total_exits(),
            stray: self.stray_count(),
        }
    }

    /// Per node, in vertex order: state code, fill ratio, fault flag.
    pub fn observation(&self) -> Vec<f32> {
        self.nodes_by_vertex()
            .into_iter()
            .flat_map(|n| {
                [
                    f32::from(n.state().code()),
                    n.fill_ratio().to_num::<f32>(),
                    if n.is_failed() { 1.0 } else { 0.0 },
                ]
            })
            .collect()
    }

    /// Vertices of failed nodes, ascending. These are the valid targets of a
    /// repair action.
    pub fn repair_candidates(&self) -> Vec<Vertex> {
        let mut failed: Vec<Vertex> = self
            .nodes()
            .filter(|n| n.is_failed())
            .map(Node::vertex)
            .collect();
        failed.sort_unstable();
        failed
    }

    /// Look a node up by its graph vertex.
    pub fn node_at(&self, vertex: Vertex) -> Option<&Node> {
        self.nodes().find(|n| n.vertex() == vertex)
    }

    /// Hash of the state that drives future behaviour. Two lines built and
    /// stepped identically hash identically.
    pub fn state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.current_tick());
        h.write_u64(self.rng_state());
        for node in self.nodes() {
            h.write_u32(node.vertex().0);
            h.write(&[node.state().code(), u8::from(node.hold_sent())]);
            h.write_u64(node.items_since_failure());
            h.write_u32(node.upstream_hold_refs());
            h.write_u64(node.exit_count());
            if let Some(queue) = node.queue() {
                for item in queue.items() {
                    h.write_u64(item.0);
                }
            }
        }
        for transit in self.transits() {
            h.write_u64(transit.item.0);
            h.write_u64(transit.arrive_at);
        }
        h.finish()
    }

    fn nodes_by_vertex(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nodes().collect();
        nodes.sort_by_key(|n| n.vertex());
        nodes
    }
}

// ---------------------------------------------------------------------------
// State hash
// ---------------------------------------------------------------------------

/// FNV-1a (64-bit) over line state. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeConfig, QueueConfig};
    use crate::queue::TailEnd;

    fn at(vertex: u32) -> NodeConfig {
        NodeConfig {
            vertex: Vertex(vertex),
            queue: Some(QueueConfig {
                capacity: 4,
                tail_end: TailEnd::Last,
            }),
            ..NodeConfig::default()
        }
    }

    #[test]
    fn observation_is_in_vertex_order() {
        let mut line = Line::new(3);
        let late = line.add_node(at(2)).unwrap();
        let _early = line.add_node(at(1)).unwrap();
        line.force_fail(late);

        let obs = line.observation();
        assert_eq!(obs.len(), 6);
        assert_eq!(&obs[..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&obs[3..], &[3.0, 0.0, 1.0]);
    }

    #[test]
    fn repair_candidates_list_failed_vertices() {
        let mut line = Line::new(3);
        let a = line.add_node(at(5)).unwrap();
        let b = line.add_node(at(3)).unwrap();
        let _c = line.add_node(at(4)).unwrap();
        assert!(line.repair_candidates().is_empty());
        line.force_fail(a);
        line.force_fail(b);
        assert_eq!(line.repair_candidates(), vec![Vertex(3), Vertex(5)]);
        line.force_repair(b);
        assert_eq!(line.repair_candidates(), vec![Vertex(5)]);
    }

    #[test]
    fn snapshot_copies_node_state() {
        let mut line = Line::new(3);
        let a = line.add_node(at(0)).unwrap();
        line.enter_hold(a);
        line.arrive(a, crate::id::ItemId(9));
        let snap = line.snapshot_node(a).unwrap();
        assert_eq!(snap.state, NodeState::Hold);
        assert_eq!(snap.hold_cause, Some(HoldCause::Manual));
        assert_eq!(snap.queue_count, 1);
        assert_eq!(snap.fill_ratio, Fixed64::from_num(0.25));
        assert_eq!(line.node_at(Vertex(0)).map(Node::id), Some(a));
    }

    #[cfg(feature = "json")]
    #[test]
    fn snapshot_serializes_to_json() {
        let mut line = Line::new(3);
        line.add_node(at(0)).unwrap();
        let json = line.snapshot().to_json().unwrap();
        let back: LineSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, line.snapshot());
    }

    #[test]
    fn state_hash_tracks_changes() {
        let mut line = Line::new(3);
        let a = line.add_node(at(0)).unwrap();
        let before = line.state_hash();
        assert_eq!(before, line.state_hash());
        line.force_fail(a);
        assert_ne!(before, line.state_hash());
    }
}
