//! Serde data file structs for line scenarios.
//!
//! These structs define the on-disk format for nodes, spawners, links,
//! branches and shared approach zones. They are deserialized from RON, JSON,
//! or TOML and then resolved by name into a [`Line`](lineflow_core::line::Line)
//! by the loader. Ratios and weights are plain floats here and converted to
//! fixed point on load.

use serde::Deserialize;

use lineflow_core::failure::FailureModel;
use lineflow_core::fixed::{Ticks, f64_to_fixed64};
use lineflow_core::id::Vertex;
use lineflow_core::node::{DispatchConfig, NodeConfig, PressureConfig, QueueConfig};
use lineflow_core::queue::TailEnd;
use lineflow_core::spawner::SpawnerConfig;

// ===========================================================================
// Scenario root
// ===========================================================================

/// A whole line scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct LineData {
    #[serde(default)]
    pub seed: u64,
    /// Event log capacity; the core default when absent.
    #[serde(default)]
    pub event_capacity: Option<usize>,
    pub nodes: Vec<NodeData>,
    #[serde(default)]
    pub spawners: Vec<SpawnerData>,
    #[serde(default)]
    pub links: Vec<LinkData>,
    #[serde(default)]
    pub branches: Vec<BranchData>,
    #[serde(default)]
    pub zones: Vec<ZoneData>,
}

// ===========================================================================
// Nodes
// ===========================================================================

/// A transport segment.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeData {
    pub name: String,
    /// Graph vertex; defaults to the node's position in the file.
    #[serde(default)]
    pub vertex: Option<u32>,
    /// Slot count; no buffer when absent.
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub tail_end: TailEnd,
    #[serde(default)]
    pub failure: FailureModel,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub pressure: PressureData,
    #[serde(default)]
    pub auto_repair: Option<Ticks>,
    #[serde(default)]
    pub sink: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PressureData {
    pub obey_upstream: bool,
    pub resume_ratio: f64,
}

impl Default for PressureData {
    fn default() -> Self {
        Self {
            obey_upstream: true,
            resume_ratio: 0.5,
        }
    }
}

impl NodeData {
    /// Core configuration for this node, `index` being its position in the
    /// file.
    pub fn to_config(&self, index: usize) -> NodeConfig {
        NodeConfig {
            vertex: Vertex(self.vertex.unwrap_or(index as u32)),
            queue: self.capacity.map(|capacity| QueueConfig {
                capacity,
                tail_end: self.tail_end,
            }),
            failure: self.failure.clone(),
            dispatch: self.dispatch.clone(),
            pressure: PressureConfig {
                obey_upstream: self.pressure.obey_upstream,
                resume_ratio: f64_to_fixed64(self.pressure.resume_ratio),
            },
            auto_repair: self.auto_repair,
            sink: self.sink,
        }
    }
}

// ===========================================================================
// Spawners
// ===========================================================================

/// A feeder source and the node it feeds.
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnerData {
    pub name: String,
    pub feeds: String,
    #[serde(default = "default_travel")]
    pub travel_ticks: Ticks,
    #[serde(default = "default_interval")]
    pub interval: Ticks,
    #[serde(default)]
    pub start_at: Ticks,
    #[serde(default)]
    pub budget: Option<u64>,
}

impl SpawnerData {
    pub fn to_config(&self) -> SpawnerConfig {
        SpawnerConfig {
            interval: self.interval,
            start_at: self.start_at,
            budget: self.budget,
        }
    }
}

fn default_travel() -> Ticks {
    1
}

fn default_interval() -> Ticks {
    1
}

// ===========================================================================
// Wiring
// ===========================================================================

/// A plain downstream link.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkData {
    pub from: String,
    pub to: String,
    #[serde(default = "default_travel")]
    pub travel_ticks: Ticks,
}

/// A weighted branch alternative.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchData {
    pub from: String,
    pub to: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_travel")]
    pub travel_ticks: Ticks,
}

fn default_weight() -> f64 {
    1.0
}

/// An approach zone shared by one or more nodes. Its count is maintained by
/// an external trigger collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneData {
    pub name: String,
    pub nodes: Vec<String>,
}
