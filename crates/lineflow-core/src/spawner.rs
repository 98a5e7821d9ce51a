//! Feeder sources that inject items at a fixed interval.
//!
//! A spawner is a backpressure peer: while any HOLD from the node it feeds
//! (or any other node that lists it as a child) is outstanding it emits
//! nothing.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::backpressure::{BackpressureTarget, HoldLedger, Outbox, Release};
use crate::fixed::Ticks;
use crate::id::{NodeId, SpawnerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnerConfig {
    /// Ticks between emissions (at least one).
    pub interval: Ticks,
    /// Tick of the first emission.
    pub start_at: Ticks,
    /// Total items to emit; `None` is unbounded.
    pub budget: Option<u64>,
}

impl Default for SpawnerConfig {
    fn default() -> Self {
        Self {
            interval: 1,
            start_at: 0,
            budget: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Spawner {
    id: SpawnerId,
    config: SpawnerConfig,
    holds: HoldLedger,
    next_spawn_at: Ticks,
    spawned: u64,
}

impl Spawner {
    pub fn new(id: SpawnerId, config: SpawnerConfig) -> Self {
        let next_spawn_at = config.start_at;
        Self {
            id,
            config,
            holds: HoldLedger::new(),
            next_spawn_at,
            spawned: 0,
        }
    }

    pub fn id(&self) -> SpawnerId {
        self.id
    }

    pub fn config(&self) -> &SpawnerConfig {
        &self.config
    }

    pub fn is_held(&self) -> bool {
        self.holds.is_held()
    }

    pub fn hold_refs(&self) -> u32 {
        self.holds.total()
    }

    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn is_exhausted(&self) -> bool {
        self.config.budget.is_some_and(|b| self.spawned >= b)
    }

    /// Whether an item should be emitted at `now`. Advances the emission
    /// deadline when it does. A held spawner keeps its deadline, so it emits
    /// on the first tick after release.
    pub fn poll(&mut self, now: Ticks) -> bool {
        if self.is_held() || self.is_exhausted() || now < self.next_spawn_at {
            return false;
        }
        self.spawned += 1;
        self.next_spawn_at = now.saturating_add(self.config.interval.max(1));
        true
    }
}

impl BackpressureTarget for Spawner {
    fn on_upstream_hold(&mut self, sender: NodeId, _now: Ticks, _out: &mut Outbox) {
        self.holds.hold(sender);
        trace!(spawner = ?self.id, ?sender, refs = self.holds.total(), "spawner held");
    }

    fn on_upstream_resume(&mut self, sender: NodeId, _now: Ticks, _out: &mut Outbox) {
        if self.holds.release(sender) == Release::Unmatched {
            trace!(spawner = ?self.id, ?sender, "spawner resume without matching hold ignored");
        }
    }
}
