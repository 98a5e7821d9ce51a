//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use std::collections::VecDeque;

use crate::failure::FailureModel;
use crate::fixed::{Fixed64, Ticks};
use crate::id::{NodeId, SpawnerId, Vertex};
use crate::line::Line;
use crate::node::{DispatchConfig, NodeConfig, PressureConfig, QueueConfig};
use crate::queue::TailEnd;
use crate::rng::UniformSource;
use crate::spawner::SpawnerConfig;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Uniform sources
// ===========================================================================

/// Replays a scripted sequence of draws, repeating the last one once the
/// script runs out.
#[derive(Debug, Clone)]
pub struct FixedDraws {
    draws: VecDeque<f64>,
    last: f64,
}

impl FixedDraws {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
            last: 0.5,
        }
    }

    /// Always `draw`.
    pub fn constant(draw: f64) -> Self {
        Self::new([draw])
    }
}

impl UniformSource for FixedDraws {
    fn next_unit(&mut self) -> f64 {
        if let Some(d) = self.draws.pop_front() {
            self.last = d;
        }
        self.last
    }
}

// ===========================================================================
// Config constructors
// ===========================================================================

/// A buffered segment that never fails and drains one item per tick.
pub fn segment(vertex: u32, capacity: u32) -> NodeConfig {
    NodeConfig {
        vertex: Vertex(vertex),
        queue: Some(QueueConfig {
            capacity,
            tail_end: TailEnd::Last,
        }),
        failure: FailureModel::default(),
        dispatch: DispatchConfig::default(),
        pressure: PressureConfig::default(),
        auto_repair: None,
        sink: false,
    }
}

pub fn sink(vertex: u32, capacity: u32) -> NodeConfig {
    NodeConfig {
        sink: true,
        ..segment(vertex, capacity)
    }
}

pub fn failing(vertex: u32, capacity: u32, mean: f64, auto_repair: Option<Ticks>) -> NodeConfig {
    NodeConfig {
        failure: FailureModel::Constant { mean },
        auto_repair,
        ..segment(vertex, capacity)
    }
}

// ===========================================================================
// Line builders
// ===========================================================================

/// Spawner -> n[0] -> n[1] -> ... -> sink, each link `travel` ticks long.
/// The last node is the sink.
pub fn chain(
    seed: u64,
    configs: Vec<NodeConfig>,
    spawner: SpawnerConfig,
    travel: Ticks,
) -> (Line, Vec<NodeId>, SpawnerId) {
    let mut line = Line::new(seed);
    let ids: Vec<NodeId> = configs
        .into_iter()
        .map(|c| line.add_node(c).unwrap())
        .collect();
    for pair in ids.windows(2) {
        line.connect(pair[0], pair[1], travel).unwrap();
    }
    let feeder = line.add_spawner(spawner, ids[0], travel).unwrap();
    (line, ids, feeder)
}

/// A fork: spawner -> root, root branches to each child (equal weights),
/// every child is a sink.
pub fn fork(seed: u64, capacity: u32, children: u32) -> (Line, NodeId, Vec<NodeId>) {
    let mut line = Line::new(seed);
    let root = line.add_node(segment(0, capacity)).unwrap();
    let kids: Vec<NodeId> = (1..=children)
        .map(|v| line.add_node(sink(v, capacity)).unwrap())
        .collect();
    for &kid in &kids {
        line.connect_branch(root, kid, Fixed64::ONE, 1).unwrap();
    }
    line.add_spawner(SpawnerConfig::default(), root, 1).unwrap();
    (line, root, kids)
}
