//! Transport segment with a four-state machine and an owned slot buffer.
//!
//! # States
//!
//! - **Run** -- items pass straight through; buffered items drain at full
//!   cadence.
//! - **HalfHold** -- some branch children are blocked; arrivals are buffered
//!   and drains run at half cadence.
//! - **Hold** -- fully blocked; arrivals are buffered. A node held only by its
//!   own queue pressure keeps draining, any other hold stops drains.
//! - **Fault** -- failed; no drains, no queue-pressure transitions until
//!   repaired.
//!
//! # Per-tick order
//!
//! [`Node::tick`] runs, in order: auto-repair deadline, obeying an outstanding
//! upstream hold, draining, the queue-pressure check, and branch resolution.
//! Arrivals are separate calls ([`Node::on_arrive`]) that may land at any time
//! before or between ticks.
//!
//! # Timers
//!
//! Auto-repair, drain cooldown and resume delay are deadlines in ticks; a
//! node that has not reached a deadline simply defers to a later tick.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backpressure::{BackpressureTarget, HoldLedger, Outbox, Peer, Release, SignalKind};
use crate::branch::{BranchCensus, BranchLink, BranchVerdict};
use crate::error::LineError;
use crate::event::LineEvent;
use crate::failure::{FailureModel, FailureSampler, FailureThreshold};
use crate::fixed::{Fixed64, Ticks};
use crate::id::{ItemId, NodeId, SlotId, Vertex, ZoneId};
use crate::queue::{SlotQueue, TailEnd};
use crate::rng::UniformSource;
use crate::zone::ApproachZones;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    #[default]
    Run,
    HalfHold,
    Hold,
    Fault,
}

impl NodeState {
    /// Numeric code used in observation vectors.
    pub fn code(self) -> u8 {
        match self {
            NodeState::Run => 0,
            NodeState::HalfHold => 1,
            NodeState::Hold => 2,
            NodeState::Fault => 3,
        }
    }
}

/// Why a node currently sits in [`NodeState::Hold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HoldCause {
    /// Own queue plus approach zones reached capacity. Drains continue.
    Pressure,
    /// Obeying a HOLD from an upstream node.
    Upstream,
    /// Every branch child is blocked.
    Branch,
    /// Administrative override.
    Manual,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Drain cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Items released per drain attempt (at least one).
    pub items_per_drain: u32,
    /// Ticks between drains in RUN; doubled in HALF_HOLD.
    pub drain_cooldown: Ticks,
    /// Extra ticks before draining again after a resume.
    pub resume_delay: Ticks,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            items_per_drain: 1,
            drain_cooldown: 1,
            resume_delay: 0,
        }
    }
}

/// Backpressure behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureConfig {
    /// Enter HOLD when an upstream node asserts HOLD.
    pub obey_upstream: bool,
    /// Rescind a queue-pressure HOLD once the fill ratio drops to this
    /// value. Must be below the hold threshold of 1.0 (full).
    pub resume_ratio: Fixed64,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            obey_upstream: true,
            resume_ratio: Fixed64::from_num(0.5),
        }
    }
}

/// Slot buffer shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: u32,
    #[serde(default)]
    pub tail_end: TailEnd,
}

/// Everything fixed at setup for one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub vertex: Vertex,
    /// `None` models a segment without a buffer: blocked arrivals wait in place.
    pub queue: Option<QueueConfig>,
    pub failure: FailureModel,
    pub dispatch: DispatchConfig,
    pub pressure: PressureConfig,
    /// Ticks after a failure before the node repairs itself.
    pub auto_repair: Option<Ticks>,
    /// Terminal node whose drains count as throughput.
    pub sink: bool,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), LineError> {
        let ratio = self.pressure.resume_ratio;
        if ratio < Fixed64::ZERO || ratio >= Fixed64::ONE {
            return Err(LineError::InvalidResumeRatio { ratio });
        }
        self.failure.validate()
    }
}

// ---------------------------------------------------------------------------
// Arrival outcome
// ---------------------------------------------------------------------------

/// Where an arriving item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Node is running; the item continues past it.
    PassThrough,
    /// Node is blocked; the item now occupies a slot.
    Buffered(SlotId),
    /// Node is blocked and has no free slot; the item waits where it is.
    Paused,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    config: NodeConfig,
    state: NodeState,
    hold_cause: Option<HoldCause>,

    sampler: FailureSampler,
    items_since_failure: u64,
    next_failure_at: FailureThreshold,
    repair_at: Option<Ticks>,

    upstream: HoldLedger,
    hold_sent: bool,
    next_drain_at: Ticks,
    branch_verdict: Option<BranchVerdict>,

    queue: Option<SlotQueue>,
    children: Vec<Peer>,
    branches: Vec<BranchLink>,
    zones: Vec<ZoneId>,
    exits: u64,
}

impl Node {
    /// Build a node and sample its first failure threshold.
    pub fn new<R: UniformSource + ?Sized>(id: NodeId, config: NodeConfig, rng: &mut R) -> Self {
        let mut sampler = FailureSampler::new();
        let next_failure_at = sampler.sample(&config.failure, rng);
        let queue = config
            .queue
            .as_ref()
            .map(|q| SlotQueue::new(q.capacity, q.tail_end));
        Self {
            id,
            config,
            state: NodeState::Run,
            hold_cause: None,
            sampler,
            items_since_failure: 0,
            next_failure_at,
            repair_at: None,
            upstream: HoldLedger::new(),
            hold_sent: false,
            next_drain_at: 0,
            branch_verdict: None,
            queue,
            children: Vec::new(),
            branches: Vec::new(),
            zones: Vec::new(),
            exits: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Read-only surface
    // -----------------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn vertex(&self) -> Vertex {
        self.config.vertex
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn hold_cause(&self) -> Option<HoldCause> {
        self.hold_cause
    }

    pub fn is_failed(&self) -> bool {
        self.state == NodeState::Fault
    }

    pub fn is_sink(&self) -> bool {
        self.config.sink
    }

    /// Items drained out of this node since setup (sinks only).
    pub fn exit_count(&self) -> u64 {
        self.exits
    }

    pub fn items_since_failure(&self) -> u64 {
        self.items_since_failure
    }

    pub fn next_failure_at(&self) -> FailureThreshold {
        self.next_failure_at
    }

    pub fn repair_due_at(&self) -> Option<Ticks> {
        self.repair_at
    }

    pub fn next_drain_at(&self) -> Ticks {
        self.next_drain_at
    }

    /// Outstanding upstream HOLD signals.
    pub fn upstream_hold_refs(&self) -> u32 {
        self.upstream.total()
    }

    pub fn hold_ledger(&self) -> &HoldLedger {
        &self.upstream
    }

    /// Whether this node has an unrescinded queue-pressure HOLD out to its
    /// children.
    pub fn hold_sent(&self) -> bool {
        self.hold_sent
    }

    pub fn queue(&self) -> Option<&SlotQueue> {
        self.queue.as_ref()
    }

    pub fn queue_mut(&mut self) -> Option<&mut SlotQueue> {
        self.queue.as_mut()
    }

    pub fn queue_count(&self) -> u32 {
        self.queue.as_ref().map_or(0, SlotQueue::count)
    }

    pub fn queue_capacity(&self) -> u32 {
        self.queue.as_ref().map_or(0, SlotQueue::capacity)
    }

    pub fn fill_ratio(&self) -> Fixed64 {
        self.queue.as_ref().map_or(Fixed64::ZERO, SlotQueue::fill_ratio)
    }

    /// Buffered items plus items still approaching the entrance.
    pub fn predicted_load(&self, zones: &ApproachZones) -> u32 {
        self.queue_count() + zones.total(&self.zones)
    }

    pub fn children(&self) -> &[Peer] {
        &self.children
    }

    pub fn branches(&self) -> &[BranchLink] {
        &self.branches
    }

    pub fn zones(&self) -> &[ZoneId] {
        &self.zones
    }

    // -----------------------------------------------------------------------
    // Wiring (setup only)
    // -----------------------------------------------------------------------

    pub(crate) fn add_child(&mut self, peer: Peer) {
        if !self.children.contains(&peer) {
            self.children.push(peer);
        }
    }

    pub(crate) fn add_branch(&mut self, link: BranchLink) {
        self.branches.push(link);
    }

    pub(crate) fn add_zone(&mut self, zone: ZoneId) {
        if !self.zones.contains(&zone) {
            self.zones.push(zone);
        }
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    fn set_state(&mut self, to: NodeState, now: Ticks, out: &mut Outbox) -> bool {
        let from = self.state;
        if from == to {
            return false;
        }
        self.state = to;
        if to != NodeState::Hold {
            self.hold_cause = None;
        }
        trace!(node = ?self.id, vertex = self.config.vertex.0, ?from, ?to, "node state change");
        out.emit(LineEvent::StateChanged {
            node: self.id,
            from,
            to,
            tick: now,
        });
        true
    }

    /// Enter HOLD for `cause`. Already holding: a stronger cause replaces
    /// a pressure-only cause, never the other way round.
    fn hold_for(&mut self, cause: HoldCause, now: Ticks, out: &mut Outbox) {
        if self.state == NodeState::Fault {
            return;
        }
        if self.state == NodeState::Hold {
            if cause != HoldCause::Pressure {
                self.hold_cause = Some(cause);
            }
            return;
        }
        self.set_state(NodeState::Hold, now, out);
        self.hold_cause = Some(cause);
    }

    fn run(&mut self, with_resume_delay: bool, now: Ticks, out: &mut Outbox) -> bool {
        if !self.set_state(NodeState::Run, now, out) {
            return false;
        }
        if with_resume_delay {
            let resume_at = now.saturating_add(self.config.dispatch.resume_delay);
            self.next_drain_at = self.next_drain_at.max(resume_at);
        }
        true
    }

    fn obeyed_upstream_hold(&self) -> bool {
        self.config.pressure.obey_upstream && self.upstream.is_held()
    }

    fn held_manually(&self) -> bool {
        self.state == NodeState::Hold && self.hold_cause == Some(HoldCause::Manual)
    }

    /// Administrative HOLD. No-op while failed or already holding.
    pub fn enter_hold(&mut self, now: Ticks, out: &mut Outbox) -> bool {
        if matches!(self.state, NodeState::Fault | NodeState::Hold) {
            return false;
        }
        self.hold_for(HoldCause::Manual, now, out);
        true
    }

    /// Administrative HALF_HOLD. No-op while failed or already half-holding.
    pub fn enter_half_hold(&mut self, now: Ticks, out: &mut Outbox) -> bool {
        if self.state == NodeState::Fault {
            return false;
        }
        self.set_state(NodeState::HalfHold, now, out)
    }

    /// Administrative RUN. No-op while failed or already running.
    pub fn enter_run(&mut self, with_resume_delay: bool, now: Ticks, out: &mut Outbox) -> bool {
        if self.state == NodeState::Fault {
            return false;
        }
        self.run(with_resume_delay, now, out)
    }

    fn fail(&mut self, forced: bool, now: Ticks, out: &mut Outbox) -> bool {
        if self.state == NodeState::Fault {
            return false;
        }
        self.set_state(NodeState::Fault, now, out);
        self.repair_at = self.config.auto_repair.map(|delay| now.saturating_add(delay));
        debug!(
            node = ?self.id,
            vertex = self.config.vertex.0,
            items = self.items_since_failure,
            forced,
            repair_at = ?self.repair_at,
            "node failed"
        );
        out.emit(LineEvent::NodeFailed {
            node: self.id,
            items: self.items_since_failure,
            forced,
            tick: now,
        });
        true
    }

    fn repair<R: UniformSource + ?Sized>(
        &mut self,
        automatic: bool,
        now: Ticks,
        rng: &mut R,
        out: &mut Outbox,
    ) -> bool {
        if self.state != NodeState::Fault {
            return false;
        }
        self.items_since_failure = 0;
        self.next_failure_at = self.sampler.sample(&self.config.failure, rng);
        self.repair_at = None;
        if self.upstream.is_held() {
            self.set_state(NodeState::Hold, now, out);
            self.hold_cause = Some(HoldCause::Upstream);
        } else {
            self.run(true, now, out);
        }
        debug!(
            node = ?self.id,
            vertex = self.config.vertex.0,
            automatic,
            next_failure_at = ?self.next_failure_at,
            state = ?self.state,
            "node repaired"
        );
        out.emit(LineEvent::NodeRepaired {
            node: self.id,
            automatic,
            tick: now,
        });
        true
    }

    /// Fail the node now. No-op if already failed.
    pub fn force_fail(&mut self, now: Ticks, out: &mut Outbox) -> bool {
        self.fail(true, now, out)
    }

    /// Repair the node now. No-op if not failed.
    pub fn force_repair<R: UniformSource + ?Sized>(
        &mut self,
        now: Ticks,
        rng: &mut R,
        out: &mut Outbox,
    ) -> bool {
        self.repair(false, now, rng, out)
    }

    // -----------------------------------------------------------------------
    // Arrivals
    // -----------------------------------------------------------------------

    /// An item reached this node. Counts toward the failure threshold (unless
    /// already failed), then passes through or is buffered.
    pub fn on_arrive(&mut self, item: ItemId, now: Ticks, out: &mut Outbox) -> Arrival {
        if self.state != NodeState::Fault {
            self.items_since_failure += 1;
            if self.next_failure_at.is_reached(self.items_since_failure) {
                self.fail(false, now, out);
            }
        }
        self.admit(item)
    }

    /// Route an item that already counted as arrived: pass it through while
    /// running, otherwise buffer it. Used to retry paused items.
    pub fn admit(&mut self, item: ItemId) -> Arrival {
        if self.state == NodeState::Run {
            return Arrival::PassThrough;
        }
        match self.queue.as_mut().and_then(|q| q.try_admit(item)) {
            Some(slot) => Arrival::Buffered(slot),
            None => Arrival::Paused,
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Advance one tick. `branch_states` are the current states of the live
    /// branch children. Returns the items drained this tick, head first.
    pub fn tick<R: UniformSource + ?Sized>(
        &mut self,
        now: Ticks,
        zones: &ApproachZones,
        branch_states: &[NodeState],
        rng: &mut R,
        out: &mut Outbox,
    ) -> Vec<ItemId> {
        if self.state == NodeState::Fault && self.repair_at.is_some_and(|at| at <= now) {
            self.repair(true, now, rng, out);
        }
        if self.obeyed_upstream_hold() && matches!(self.state, NodeState::Run | NodeState::HalfHold) {
            self.hold_for(HoldCause::Upstream, now, out);
        }
        let drained = self.drain(now, out);
        self.check_pressure(now, zones, out);
        self.resolve_branches(now, branch_states, out);
        drained
    }

    fn can_drain(&self) -> bool {
        match self.state {
            NodeState::Run | NodeState::HalfHold => true,
            NodeState::Hold => {
                self.hold_cause == Some(HoldCause::Pressure) && !self.obeyed_upstream_hold()
            }
            NodeState::Fault => false,
        }
    }

    fn drain(&mut self, now: Ticks, out: &mut Outbox) -> Vec<ItemId> {
        if !self.can_drain() || now < self.next_drain_at {
            return Vec::new();
        }
        let Some(queue) = self.queue.as_mut() else {
            return Vec::new();
        };
        let budget = self.config.dispatch.items_per_drain.max(1) as usize;
        let mut drained = Vec::with_capacity(budget);
        while drained.len() < budget {
            match queue.try_pop_head() {
                Some((item, _)) => drained.push(item),
                None => break,
            }
        }
        if drained.is_empty() {
            return drained;
        }

        let cooldown = match self.state {
            NodeState::HalfHold => self.config.dispatch.drain_cooldown.saturating_mul(2),
            _ => self.config.dispatch.drain_cooldown,
        };
        self.next_drain_at = now.saturating_add(cooldown);

        if self.config.sink {
            for &item in &drained {
                self.record_exit(item, now, out);
            }
        }

        // A pressure-only hold clears on the first successful drain, without
        // the resume delay.
        if self.state == NodeState::Hold
            && self.hold_cause == Some(HoldCause::Pressure)
            && !self.upstream.is_held()
        {
            self.run(false, now, out);
        }
        drained
    }

    /// Count an item leaving the line at this node.
    pub(crate) fn record_exit(&mut self, item: ItemId, now: Ticks, out: &mut Outbox) {
        self.exits += 1;
        out.emit(LineEvent::ItemExited {
            node: self.id,
            item,
            tick: now,
        });
    }

    /// Assert or rescind the queue-pressure HOLD to children.
    fn check_pressure(&mut self, now: Ticks, zones: &ApproachZones, out: &mut Outbox) {
        let Some(queue) = self.queue.as_ref() else {
            return;
        };
        let capacity = queue.capacity();
        if capacity == 0 {
            return;
        }

        if !self.hold_sent {
            let predicted = queue.count() + zones.total(&self.zones);
            if predicted < capacity {
                return;
            }
            self.hold_sent = true;
            out.broadcast(self.id, &self.children, SignalKind::Hold);
            out.emit(LineEvent::HoldAsserted {
                node: self.id,
                tick: now,
            });
            debug!(node = ?self.id, predicted, capacity, "queue pressure hold asserted");
            // HALF_HOLD only notifies children; FAULT ignores pressure.
            if self.state == NodeState::Run {
                self.hold_for(HoldCause::Pressure, now, out);
            }
        } else if queue.fill_ratio() <= self.config.pressure.resume_ratio {
            self.hold_sent = false;
            out.broadcast(self.id, &self.children, SignalKind::Resume);
            out.emit(LineEvent::HoldRescinded {
                node: self.id,
                tick: now,
            });
            debug!(node = ?self.id, fill = %queue.fill_ratio(), "queue pressure hold rescinded");
            if matches!(self.state, NodeState::Hold | NodeState::HalfHold)
                && !self.upstream.is_held()
                && self.branches.is_empty()
                && !self.held_manually()
            {
                self.run(true, now, out);
            }
        }
    }

    fn resolve_branches(&mut self, now: Ticks, branch_states: &[NodeState], out: &mut Outbox) {
        if self.branches.is_empty() || self.state == NodeState::Fault {
            return;
        }
        let verdict = BranchCensus::tally(branch_states.iter().copied()).verdict();
        self.branch_verdict = verdict;
        match verdict {
            None => {}
            Some(BranchVerdict::AllBlocked) => self.hold_for(HoldCause::Branch, now, out),
            Some(BranchVerdict::Mixed) => {
                if !self.obeyed_upstream_hold() && !self.held_manually() {
                    self.set_state(NodeState::HalfHold, now, out);
                }
            }
            Some(BranchVerdict::AllAvailable) => {
                if self.held_manually() || self.upstream.is_held() {
                    return;
                }
                if !self.hold_sent {
                    self.run(true, now, out);
                } else if self.state == NodeState::Hold {
                    // Children recovered but our own pressure hold is still
                    // out: stay in HOLD, but let drains clear it.
                    self.hold_cause = Some(HoldCause::Pressure);
                }
            }
        }
    }

    /// Most recent branch classification, if this node is a branch point.
    pub fn branch_verdict(&self) -> Option<BranchVerdict> {
        self.branch_verdict
    }
}

impl BackpressureTarget for Node {
    fn on_upstream_hold(&mut self, sender: NodeId, now: Ticks, out: &mut Outbox) {
        self.upstream.hold(sender);
        trace!(node = ?self.id, ?sender, refs = self.upstream.total(), "upstream hold");
        if self.config.pressure.obey_upstream {
            self.hold_for(HoldCause::Upstream, now, out);
        }
    }

    fn on_upstream_resume(&mut self, sender: NodeId, now: Ticks, out: &mut Outbox) {
        match self.upstream.release(sender) {
            Release::Unmatched => {
                debug!(node = ?self.id, ?sender, "resume without matching hold ignored");
            }
            Release::StillHeld => {
                trace!(node = ?self.id, ?sender, refs = self.upstream.total(), "upstream resume");
            }
            Release::Cleared => {
                if self.state == NodeState::Hold {
                    self.hold_sent = false;
                    self.run(true, now, out);
                    out.broadcast(self.id, &self.children, SignalKind::Resume);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::SimRng;
    use slotmap::SlotMap;

    struct Half;

    impl UniformSource for Half {
        fn next_unit(&mut self) -> f64 {
            0.5
        }
    }

    fn ids(n: usize) -> Vec<NodeId> {
        let mut map: SlotMap<NodeId, ()> = SlotMap::with_key();
        (0..n).map(|_| map.insert(())).collect()
    }

    fn config(capacity: u32) -> NodeConfig {
        NodeConfig {
            queue: Some(QueueConfig {
                capacity,
                tail_end: TailEnd::Last,
            }),
            dispatch: DispatchConfig {
                items_per_drain: 1,
                drain_cooldown: 0,
                resume_delay: 0,
            },
            ..NodeConfig::default()
        }
    }

    fn node(capacity: u32) -> Node {
        Node::new(ids(1)[0], config(capacity), &mut Half)
    }

    #[test]
    fn constant_failure_scenario() {
        let mut cfg = config(5);
        cfg.failure = FailureModel::Constant { mean: 3.0 };
        let mut n = Node::new(ids(1)[0], cfg, &mut Half);
        let mut out = Outbox::new();
        assert_eq!(n.next_failure_at(), FailureThreshold::At(2));

        assert_eq!(n.on_arrive(ItemId(1), 0, &mut out), Arrival::PassThrough);
        assert_eq!(n.state(), NodeState::Run);
        assert!(matches!(n.on_arrive(ItemId(2), 0, &mut out), Arrival::Buffered(_)));
        assert_eq!(n.state(), NodeState::Fault);
        assert!(matches!(n.on_arrive(ItemId(3), 0, &mut out), Arrival::Buffered(_)));
        assert_eq!(n.items_since_failure(), 2, "failed node does not count");
        assert_eq!(n.queue_count(), 2);
    }

    #[test]
    fn forced_fail_and_repair_are_idempotent() {
        let mut n = node(3);
        let mut out = Outbox::new();
        assert!(!n.force_repair(0, &mut Half, &mut out));
        assert!(n.force_fail(0, &mut out));
        assert!(!n.force_fail(1, &mut out));
        assert!(n.force_repair(2, &mut Half, &mut out));
        assert!(!n.force_repair(3, &mut Half, &mut out));
        assert_eq!(n.state(), NodeState::Run);
    }

    #[test]
    fn auto_repair_after_delay() {
        let mut cfg = config(3);
        cfg.auto_repair = Some(5);
        let mut n = Node::new(ids(1)[0], cfg, &mut Half);
        let zones = ApproachZones::new();
        let mut out = Outbox::new();
        n.force_fail(10, &mut out);
        assert_eq!(n.repair_due_at(), Some(15));
        n.tick(14, &zones, &[], &mut Half, &mut out);
        assert!(n.is_failed());
        n.tick(15, &zones, &[], &mut Half, &mut out);
        assert_eq!(n.state(), NodeState::Run);
        assert_eq!(n.repair_due_at(), None);
    }

    #[test]
    fn repair_resamples_and_resets_counter() {
        let mut cfg = config(3);
        cfg.failure = FailureModel::Constant { mean: 3.0 };
        let mut n = Node::new(ids(1)[0], cfg, &mut Half);
        let mut out = Outbox::new();
        n.on_arrive(ItemId(1), 0, &mut out);
        n.on_arrive(ItemId(2), 0, &mut out);
        assert!(n.is_failed());
        n.force_repair(1, &mut SimRng::new(5), &mut out);
        assert_eq!(n.items_since_failure(), 0);
        assert!(matches!(n.next_failure_at(), FailureThreshold::At(_)));
    }

    #[test]
    fn repair_while_upstream_held_goes_to_hold() {
        let who = ids(2);
        let mut n = Node::new(who[0], config(3), &mut Half);
        let mut out = Outbox::new();
        n.force_fail(0, &mut out);
        n.on_upstream_hold(who[1], 0, &mut out);
        assert_eq!(n.state(), NodeState::Fault, "fault has priority over hold");
        n.force_repair(1, &mut Half, &mut out);
        assert_eq!(n.state(), NodeState::Hold);
        assert_eq!(n.hold_cause(), Some(HoldCause::Upstream));
    }

    #[test]
    fn upstream_hold_and_resume_round_trip() {
        let who = ids(3);
        let mut n = Node::new(who[0], config(3), &mut Half);
        n.add_child(Peer::Node(who[2]));
        let mut out = Outbox::new();

        n.on_upstream_hold(who[1], 0, &mut out);
        assert_eq!(n.state(), NodeState::Hold);
        assert_eq!(n.upstream_hold_refs(), 1);
        assert!(out.signals.is_empty(), "hold is not re-broadcast");

        n.on_upstream_resume(who[1], 1, &mut out);
        assert_eq!(n.state(), NodeState::Run);
        assert_eq!(n.upstream_hold_refs(), 0);
        assert_eq!(out.signals.len(), 1);
        assert_eq!(out.signals[0].kind, SignalKind::Resume);
    }

    #[test]
    fn unmatched_resume_does_not_underflow() {
        let who = ids(2);
        let mut n = Node::new(who[0], config(3), &mut Half);
        let mut out = Outbox::new();
        n.on_upstream_resume(who[1], 0, &mut out);
        assert_eq!(n.upstream_hold_refs(), 0);
        assert_eq!(n.state(), NodeState::Run);
    }

    #[test]
    fn not_obeying_upstream_keeps_running() {
        let who = ids(2);
        let mut cfg = config(3);
        cfg.pressure.obey_upstream = false;
        let mut n = Node::new(who[0], cfg, &mut Half);
        let mut out = Outbox::new();
        n.on_upstream_hold(who[1], 0, &mut out);
        assert_eq!(n.state(), NodeState::Run);
        assert_eq!(n.upstream_hold_refs(), 1);
    }

    #[test]
    fn pressure_hold_asserts_and_rescinds_with_hysteresis() {
        let who = ids(2);
        let mut cfg = config(4);
        cfg.pressure.resume_ratio = Fixed64::from_num(0.25);
        let mut n = Node::new(who[0], cfg, &mut Half);
        n.add_child(Peer::Node(who[1]));
        let mut zones = ApproachZones::new();
        let z = zones.register();
        n.add_zone(z);
        zones.enter(z);
        let mut out = Outbox::new();

        n.enter_half_hold(0, &mut out);
        for i in 0..4 {
            assert!(matches!(n.on_arrive(ItemId(i), 0, &mut out), Arrival::Buffered(_)));
        }

        // Drain to 3 buffered; 3 + 1 approaching reaches capacity.
        n.tick(0, &zones, &[], &mut Half, &mut out);
        assert!(n.hold_sent());
        assert_eq!(n.state(), NodeState::HalfHold);

        // 2/4 = 0.5 is above the resume ratio: still asserted.
        n.tick(1, &zones, &[], &mut Half, &mut out);
        assert_eq!(n.queue_count(), 2);
        assert!(n.hold_sent());

        // 1/4 = 0.25 reaches the resume ratio: rescinded.
        n.tick(2, &zones, &[], &mut Half, &mut out);
        assert!(!n.hold_sent());
        let kinds: Vec<_> = out.signals.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SignalKind::Hold, SignalKind::Resume]);
    }

    #[test]
    fn pressure_counts_approach_zone() {
        let who = ids(2);
        let mut n = Node::new(who[0], config(2), &mut Half);
        n.add_child(Peer::Node(who[1]));
        let mut zones = ApproachZones::new();
        let z = zones.register();
        n.add_zone(z);
        zones.enter(z);
        zones.enter(z);
        let mut out = Outbox::new();

        n.tick(0, &zones, &[], &mut Half, &mut out);
        assert!(n.hold_sent());
        assert_eq!(n.state(), NodeState::Hold);
        assert_eq!(n.hold_cause(), Some(HoldCause::Pressure));
        assert_eq!(out.signals.len(), 1);
        assert_eq!(out.signals[0].kind, SignalKind::Hold);

        // Empty queue: next tick rescinds (fill 0 <= 0.5) and runs again.
        zones.leave(z);
        zones.leave(z);
        n.tick(1, &zones, &[], &mut Half, &mut out);
        assert!(!n.hold_sent());
        assert_eq!(n.state(), NodeState::Run);
    }

    #[test]
    fn half_hold_only_notifies_children_on_pressure() {
        let who = ids(2);
        let mut n = Node::new(who[0], config(1), &mut Half);
        n.add_child(Peer::Node(who[1]));
        let mut zones = ApproachZones::new();
        let z = zones.register();
        n.add_zone(z);
        zones.enter(z);
        let mut out = Outbox::new();
        n.enter_half_hold(0, &mut out);
        n.tick(0, &zones, &[], &mut Half, &mut out);
        assert!(n.hold_sent());
        assert_eq!(n.state(), NodeState::HalfHold);
    }

    #[test]
    fn half_hold_doubles_drain_cooldown() {
        let mut cfg = config(4);
        cfg.dispatch.drain_cooldown = 3;
        let mut n = Node::new(ids(1)[0], cfg, &mut Half);
        let zones = ApproachZones::new();
        let mut out = Outbox::new();
        n.enter_half_hold(0, &mut out);
        n.on_arrive(ItemId(1), 0, &mut out);
        n.on_arrive(ItemId(2), 0, &mut out);

        assert_eq!(n.tick(0, &zones, &[], &mut Half, &mut out), vec![ItemId(1)]);
        assert_eq!(n.next_drain_at(), 6);
        assert!(n.tick(5, &zones, &[], &mut Half, &mut out).is_empty());
        assert_eq!(n.tick(6, &zones, &[], &mut Half, &mut out), vec![ItemId(2)]);
    }

    #[test]
    fn fault_blocks_drains() {
        let mut n = node(3);
        let zones = ApproachZones::new();
        let mut out = Outbox::new();
        n.force_fail(0, &mut out);
        n.on_arrive(ItemId(1), 0, &mut out);
        assert!(n.tick(1, &zones, &[], &mut Half, &mut out).is_empty());
        assert_eq!(n.queue_count(), 1);
    }

    #[test]
    fn manual_hold_blocks_drains_until_run() {
        let mut n = node(3);
        let zones = ApproachZones::new();
        let mut out = Outbox::new();
        assert!(n.enter_hold(0, &mut out));
        assert!(!n.enter_hold(0, &mut out));
        n.on_arrive(ItemId(1), 0, &mut out);
        assert!(n.tick(1, &zones, &[], &mut Half, &mut out).is_empty());
        assert!(n.enter_run(false, 2, &mut out));
        assert_eq!(n.tick(2, &zones, &[], &mut Half, &mut out), vec![ItemId(1)]);
    }

    #[test]
    fn resume_delay_postpones_drain() {
        let mut cfg = config(3);
        cfg.dispatch.resume_delay = 4;
        let mut n = Node::new(ids(1)[0], cfg, &mut Half);
        let zones = ApproachZones::new();
        let mut out = Outbox::new();
        n.enter_hold(0, &mut out);
        n.on_arrive(ItemId(1), 0, &mut out);
        n.enter_run(true, 10, &mut out);
        assert!(n.tick(13, &zones, &[], &mut Half, &mut out).is_empty());
        assert_eq!(n.tick(14, &zones, &[], &mut Half, &mut out), vec![ItemId(1)]);
    }

    #[test]
    fn paused_when_blocked_without_queue() {
        let mut n = Node::new(ids(1)[0], NodeConfig::default(), &mut Half);
        let mut out = Outbox::new();
        n.enter_hold(0, &mut out);
        assert_eq!(n.on_arrive(ItemId(1), 0, &mut out), Arrival::Paused);
        assert_eq!(n.admit(ItemId(1)), Arrival::Paused);
        n.enter_run(false, 1, &mut out);
        assert_eq!(n.admit(ItemId(1)), Arrival::PassThrough);
    }

    #[test]
    fn sink_counts_exits() {
        let mut cfg = config(3);
        cfg.sink = true;
        cfg.dispatch.items_per_drain = 2;
        let mut n = Node::new(ids(1)[0], cfg, &mut Half);
        let zones = ApproachZones::new();
        let mut out = Outbox::new();
        n.enter_half_hold(0, &mut out);
        n.on_arrive(ItemId(1), 0, &mut out);
        n.on_arrive(ItemId(2), 0, &mut out);
        n.tick(0, &zones, &[], &mut Half, &mut out);
        assert_eq!(n.exit_count(), 2);
        let exits = out
            .events
            .iter()
            .filter(|e| matches!(e, LineEvent::ItemExited { .. }))
            .count();
        assert_eq!(exits, 2);
    }

    #[test]
    fn pressure_hold_waits_for_upstream_even_when_not_obeyed() {
        let who = ids(2);
        let mut cfg = config(2);
        cfg.pressure.obey_upstream = false;
        let mut n = Node::new(who[0], cfg, &mut Half);
        let mut zones = ApproachZones::new();
        let z = zones.register();
        n.add_zone(z);
        zones.enter(z);
        zones.enter(z);
        let mut out = Outbox::new();

        n.on_upstream_hold(who[1], 0, &mut out);
        assert_eq!(n.state(), NodeState::Run);
        n.tick(0, &zones, &[], &mut Half, &mut out);
        assert_eq!(n.state(), NodeState::Hold);
        assert_eq!(n.hold_cause(), Some(HoldCause::Pressure));
        assert!(matches!(n.on_arrive(ItemId(1), 0, &mut out), Arrival::Buffered(_)));

        // The drain succeeds, but an upstream hold is still outstanding.
        assert_eq!(n.tick(1, &zones, &[], &mut Half, &mut out), vec![ItemId(1)]);
        assert_eq!(n.state(), NodeState::Hold);
        assert_eq!(n.upstream_hold_refs(), 1);

        n.on_upstream_resume(who[1], 2, &mut out);
        assert_eq!(n.state(), NodeState::Run);
    }

    #[test]
    fn rescind_returns_half_hold_to_run() {
        let who = ids(2);
        let mut n = Node::new(who[0], config(2), &mut Half);
        n.add_child(Peer::Node(who[1]));
        let mut zones = ApproachZones::new();
        let z = zones.register();
        n.add_zone(z);
        zones.enter(z);
        let mut out = Outbox::new();

        n.enter_half_hold(0, &mut out);
        n.on_arrive(ItemId(1), 0, &mut out);
        n.on_arrive(ItemId(2), 0, &mut out);

        // One drained, one left plus one approaching: asserted.
        n.tick(0, &zones, &[], &mut Half, &mut out);
        assert!(n.hold_sent());
        assert_eq!(n.state(), NodeState::HalfHold);

        zones.leave(z);
        n.tick(1, &zones, &[], &mut Half, &mut out);
        assert!(!n.hold_sent());
        assert_eq!(n.state(), NodeState::Run);
    }

    #[test]
    fn branch_recovery_keeps_outstanding_pressure_hold() {
        let who = ids(3);
        let mut cfg = config(2);
        cfg.pressure.resume_ratio = Fixed64::from_num(0.25);
        let mut n = Node::new(who[0], cfg, &mut Half);
        for &kid in &who[1..] {
            n.add_branch(BranchLink {
                node: kid,
                weight: Fixed64::ONE,
            });
        }
        let mut zones = ApproachZones::new();
        let z = zones.register();
        n.add_zone(z);
        zones.enter(z);
        zones.enter(z);
        let mut out = Outbox::new();
        let blocked = [NodeState::Hold, NodeState::Hold];
        let open = [NodeState::Run, NodeState::Run];

        n.tick(0, &zones, &blocked, &mut Half, &mut out);
        assert!(n.hold_sent());
        assert_eq!(n.state(), NodeState::Hold);
        assert_eq!(n.hold_cause(), Some(HoldCause::Branch));
        assert!(matches!(n.on_arrive(ItemId(1), 0, &mut out), Arrival::Buffered(_)));

        // Children recover while our own hold is out: stay held, drainable.
        assert!(n.tick(1, &zones, &open, &mut Half, &mut out).is_empty());
        assert_eq!(n.state(), NodeState::Hold);
        assert_eq!(n.hold_cause(), Some(HoldCause::Pressure));
        assert!(n.hold_sent());

        zones.leave(z);
        zones.leave(z);
        assert_eq!(n.tick(2, &zones, &open, &mut Half, &mut out), vec![ItemId(1)]);
        assert_eq!(n.state(), NodeState::Run);
        assert!(!n.hold_sent());
    }

    #[test]
    fn huge_delays_saturate() {
        let mut cfg = config(3);
        cfg.dispatch.drain_cooldown = Ticks::MAX;
        cfg.dispatch.resume_delay = Ticks::MAX;
        cfg.auto_repair = Some(Ticks::MAX);
        let mut n = Node::new(ids(1)[0], cfg, &mut Half);
        let zones = ApproachZones::new();
        let mut out = Outbox::new();

        n.enter_half_hold(0, &mut out);
        n.on_arrive(ItemId(1), 0, &mut out);
        assert_eq!(n.tick(5, &zones, &[], &mut Half, &mut out), vec![ItemId(1)]);
        assert_eq!(n.next_drain_at(), Ticks::MAX);

        n.enter_run(true, 7, &mut out);
        assert_eq!(n.next_drain_at(), Ticks::MAX);
        n.force_fail(9, &mut out);
        assert_eq!(n.repair_due_at(), Some(Ticks::MAX));
    }

    #[test]
    fn validate_rejects_resume_at_or_above_hold() {
        let mut cfg = config(3);
        cfg.pressure.resume_ratio = Fixed64::ONE;
        assert!(matches!(cfg.validate(), Err(LineError::InvalidResumeRatio { .. })));
        cfg.pressure.resume_ratio = Fixed64::from_num(0.99);
        assert!(cfg.validate().is_ok());
    }
}
