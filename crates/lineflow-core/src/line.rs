//! The line: owns every node, spawner and approach zone, and advances them
//! one tick at a time.
//!
//! # Architecture
//!
//! The `Line` owns:
//! - Nodes in a [`SlotMap`], visited each tick in insertion order
//! - Spawners feeding nodes over timed links
//! - [`ApproachZones`]; every node gets an inflow zone counting items in
//!   transit toward it or waiting at its entrance
//! - In-flight transits and per-node waiting lines
//! - The [`SimRng`] used for failure sampling and branch routing
//! - The [`EventLog`]
//!
//! # Tick pipeline
//!
//! Each [`Line::step`] runs:
//! 1. **Spawn** -- spawners whose interval elapsed and that are not held emit
//!    an item onto their link.
//! 2. **Arrive** -- transits whose travel time elapsed join their
//!    destination's waiting line; every waiting line is offered to its node
//!    head first. Items the node cannot take stay paused.
//! 3. **Nodes** -- each node ticks (repair deadline, upstream hold, drain,
//!    queue pressure, branch resolution). Signals it emits are delivered
//!    before the next node ticks, so a cascade can cross several nodes in a
//!    single tick.
//! 4. **Bookkeeping** -- the tick counter advances.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use tracing::{debug, warn};

use crate::backpressure::{BackpressureTarget, Outbox, Peer, Signal, SignalKind};
use crate::branch::{BranchLink, is_blocked, pick_branch};
use crate::error::LineError;
use crate::event::{EventLog, LineEvent};
use crate::fixed::{Fixed64, Ticks};
use crate::id::{ItemId, NodeId, SpawnerId, ZoneId};
use crate::node::{Arrival, Node, NodeConfig, NodeState};
use crate::rng::{SimRng, UniformSource};
use crate::spawner::{Spawner, SpawnerConfig};
use crate::zone::ApproachZones;

// ---------------------------------------------------------------------------
// Wiring types
// ---------------------------------------------------------------------------

/// A timed item-flow link toward a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub to: NodeId,
    pub travel_ticks: Ticks,
}

/// Where items leaving a node go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outlet {
    Next(Link),
    /// One link per branch, parallel to the node's branch list.
    Branches(Vec<Link>),
}

/// An item travelling along a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transit {
    pub item: ItemId,
    pub to: NodeId,
    pub arrive_at: Ticks,
}

/// An item at a node's entrance that has not been admitted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Waiting {
    item: ItemId,
    /// Already counted by the node's failure counter.
    counted: bool,
}

// ---------------------------------------------------------------------------
// Line
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Line {
    nodes: SlotMap<NodeId, Node>,
    order: Vec<NodeId>,
    outlets: SecondaryMap<NodeId, Outlet>,
    inflow: SecondaryMap<NodeId, ZoneId>,
    waiting: SecondaryMap<NodeId, VecDeque<Waiting>>,

    spawners: SlotMap<SpawnerId, Spawner>,
    spawner_links: SecondaryMap<SpawnerId, Link>,

    zones: ApproachZones,
    transits: Vec<Transit>,
    rng: SimRng,
    tick: Ticks,
    next_item: u64,
    /// Items that left a non-sink node with nowhere to go.
    stray: u64,

    pub events: EventLog,
}

impl Line {
    /// Create an empty line whose randomness derives from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            order: Vec::new(),
            outlets: SecondaryMap::new(),
            inflow: SecondaryMap::new(),
            waiting: SecondaryMap::new(),
            spawners: SlotMap::with_key(),
            spawner_links: SecondaryMap::new(),
            zones: ApproachZones::new(),
            transits: Vec::new(),
            rng: SimRng::new(seed),
            tick: 0,
            next_item: 0,
            stray: 0,
            events: EventLog::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Add a node. Its first failure threshold is sampled immediately.
    pub fn add_node(&mut self, config: NodeConfig) -> Result<NodeId, LineError> {
        config.validate()?;
        let rng = &mut self.rng;
        let id = self.nodes.insert_with_key(|id| Node::new(id, config, rng));
        let zone = self.zones.register();
        if let Some(node) = self.nodes.get_mut(id) {
            node.add_zone(zone);
        }
        self.inflow.insert(id, zone);
        self.waiting.insert(id, VecDeque::new());
        self.order.push(id);
        Ok(id)
    }

    /// Add a spawner feeding `target` over a link of `travel_ticks`. The
    /// spawner becomes a backpressure child of its target.
    pub fn add_spawner(
        &mut self,
        config: SpawnerConfig,
        target: NodeId,
        travel_ticks: Ticks,
    ) -> Result<SpawnerId, LineError> {
        self.require_node(target)?;
        let id = self.spawners.insert_with_key(|id| Spawner::new(id, config));
        self.spawner_links.insert(
            id,
            Link {
                to: target,
                travel_ticks,
            },
        );
        if let Some(node) = self.nodes.get_mut(target) {
            node.add_child(Peer::Spawner(id));
        }
        Ok(id)
    }

    /// Route items from `from` to `to`. `from` becomes a backpressure child
    /// of `to`: congestion at `to` holds `from`.
    pub fn connect(&mut self, from: NodeId, to: NodeId, travel_ticks: Ticks) -> Result<(), LineError> {
        self.require_node(from)?;
        self.require_node(to)?;
        if from == to {
            return Err(LineError::SelfLink { role: "downstream" });
        }
        if self.outlets.contains_key(from) {
            return Err(LineError::OutletTaken {
                detail: format!("{from:?}"),
            });
        }
        self.outlets.insert(from, Outlet::Next(Link { to, travel_ticks }));
        if let Some(node) = self.nodes.get_mut(to) {
            node.add_child(Peer::Node(from));
        }
        Ok(())
    }

    /// Add `to` as a weighted branch alternative of `from`. Branch children
    /// do not hold their parent by signal; the parent derives its state from
    /// theirs every tick.
    pub fn connect_branch(
        &mut self,
        from: NodeId,
        to: NodeId,
        weight: Fixed64,
        travel_ticks: Ticks,
    ) -> Result<(), LineError> {
        self.require_node(from)?;
        self.require_node(to)?;
        if from == to {
            return Err(LineError::SelfLink { role: "branch" });
        }
        if weight < Fixed64::ZERO {
            return Err(LineError::NegativeBranchWeight { weight });
        }
        let link = Link { to, travel_ticks };
        match self.outlets.get_mut(from) {
            Some(Outlet::Branches(links)) => links.push(link),
            Some(Outlet::Next(_)) => {
                return Err(LineError::OutletTaken {
                    detail: format!("{from:?}"),
                });
            }
            None => {
                self.outlets.insert(from, Outlet::Branches(vec![link]));
            }
        }
        if let Some(node) = self.nodes.get_mut(from) {
            node.add_branch(BranchLink { node: to, weight });
        }
        Ok(())
    }

    /// Make `peer` receive `node`'s HOLD/RESUME broadcasts without any item
    /// flow between them.
    pub fn add_child(&mut self, node: NodeId, peer: Peer) -> Result<(), LineError> {
        match peer {
            Peer::Node(child) => {
                self.require_node(child)?;
                if child == node {
                    return Err(LineError::SelfLink { role: "child" });
                }
            }
            Peer::Spawner(s) if !self.spawners.contains_key(s) => {
                return Err(LineError::UnknownSpawner {
                    detail: format!("{s:?}"),
                });
            }
            Peer::Spawner(_) => {}
        }
        self.require_node_mut(node)?.add_child(peer);
        Ok(())
    }

    /// Register an extra approach zone counted in `node`'s predicted load.
    /// The caller owns the counts through [`zones_mut`](Self::zones_mut).
    pub fn register_approach_zone(&mut self, node: NodeId) -> Result<ZoneId, LineError> {
        self.require_node(node)?;
        let zone = self.zones.register();
        self.require_node_mut(node)?.add_zone(zone);
        Ok(zone)
    }

    /// Attach an already registered zone to another node as well.
    pub fn attach_approach_zone(&mut self, node: NodeId, zone: ZoneId) -> Result<(), LineError> {
        if !self.zones.contains(zone) {
            return Err(LineError::UnknownZone {
                detail: format!("{zone:?}"),
            });
        }
        self.require_node_mut(node)?.add_zone(zone);
        Ok(())
    }

    fn require_node(&self, id: NodeId) -> Result<&Node, LineError> {
        self.nodes.get(id).ok_or_else(|| LineError::UnknownNode {
            detail: format!("{id:?}"),
        })
    }

    fn require_node_mut(&mut self, id: NodeId) -> Result<&mut Node, LineError> {
        self.nodes.get_mut(id).ok_or_else(|| LineError::UnknownNode {
            detail: format!("{id:?}"),
        })
    }

    // -----------------------------------------------------------------------
    // Read access
    // -----------------------------------------------------------------------

    pub fn current_tick(&self) -> Ticks {
        self.tick
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Nodes in visiting order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.order.iter().filter_map(|id| self.nodes.get(*id))
    }

    pub fn node_ids(&self) -> &[NodeId] {
        &self.order
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn spawner(&self, id: SpawnerId) -> Option<&Spawner> {
        self.spawners.get(id)
    }

    pub fn spawners(&self) -> impl Iterator<Item = &Spawner> + '_ {
        self.spawners.values()
    }

    pub fn outlet(&self, id: NodeId) -> Option<&Outlet> {
        self.outlets.get(id)
    }

    /// The inflow zone the line's own transit model maintains for `node`.
    pub fn inflow_zone(&self, node: NodeId) -> Option<ZoneId> {
        self.inflow.get(node).copied()
    }

    pub fn zones(&self) -> &ApproachZones {
        &self.zones
    }

    /// Mutable zone counts for external trigger collaborators.
    pub fn zones_mut(&mut self) -> &mut ApproachZones {
        &mut self.zones
    }

    pub fn transits(&self) -> &[Transit] {
        &self.transits
    }

    /// Items paused at `node`'s entrance.
    pub fn waiting_at(&self, node: NodeId) -> usize {
        self.waiting.get(node).map_or(0, VecDeque::len)
    }

    pub(crate) fn rng_state(&self) -> u64 {
        self.rng.state()
    }

    /// Items that left a non-sink node without an outlet.
    pub fn stray_count(&self) -> u64 {
        self.stray
    }

    /// Cumulative exits over every sink.
    pub fn total_exits(&self) -> u64 {
        self.nodes.values().filter(|n| n.is_sink()).map(Node::exit_count).sum()
    }

    /// Nothing in transit, nothing waiting, every queue empty.
    pub fn is_drained(&self) -> bool {
        self.transits.is_empty()
            && self.waiting.values().all(VecDeque::is_empty)
            && self.nodes.values().all(|n| n.queue_count() == 0)
    }

    // -----------------------------------------------------------------------
    // External operations
    // -----------------------------------------------------------------------

    /// Allocate a fresh item id.
    pub fn new_item(&mut self) -> ItemId {
        let item = ItemId(self.next_item);
        self.next_item += 1;
        item
    }

    /// Put a new item on its way to `to`. It arrives after `travel_ticks`.
    pub fn inject(&mut self, to: NodeId, travel_ticks: Ticks) -> Option<ItemId> {
        self.nodes.get(to)?;
        let item = self.new_item();
        self.dispatch(item, Link { to, travel_ticks }, self.tick);
        Some(item)
    }

    /// Deliver an item directly to `node`, as an external motion collaborator
    /// would when the item finishes its segment. The caller keeps handling a
    /// passed-through or paused item; `None` if the node does not exist.
    pub fn arrive(&mut self, node: NodeId, item: ItemId) -> Option<Arrival> {
        let now = self.tick;
        let mut out = Outbox::new();
        let arrival = self.nodes.get_mut(node)?.on_arrive(item, now, &mut out);
        self.flush(out, now);
        Some(arrival)
    }

    /// Retry an item that [`Line::arrive`] left paused. It already counted
    /// toward the node's failure threshold, so it is not counted again.
    pub fn admit(&mut self, node: NodeId, item: ItemId) -> Option<Arrival> {
        Some(self.nodes.get_mut(node)?.admit(item))
    }

    pub fn force_fail(&mut self, node: NodeId) -> bool {
        self.with_node(node, |n, now, _, out| n.force_fail(now, out))
    }

    pub fn force_repair(&mut self, node: NodeId) -> bool {
        self.with_node(node, |n, now, rng, out| n.force_repair(now, rng, out))
    }

    pub fn enter_hold(&mut self, node: NodeId) -> bool {
        self.with_node(node, |n, now, _, out| n.enter_hold(now, out))
    }

    pub fn enter_half_hold(&mut self, node: NodeId) -> bool {
        self.with_node(node, |n, now, _, out| n.enter_half_hold(now, out))
    }

    pub fn enter_run(&mut self, node: NodeId, with_resume_delay: bool) -> bool {
        self.with_node(node, |n, now, _, out| n.enter_run(with_resume_delay, now, out))
    }

    /// Broadcast HOLD or RESUME from `node` to all of its children.
    pub fn notify_children(&mut self, node: NodeId, kind: SignalKind) {
        let Some(n) = self.nodes.get(node) else {
            return;
        };
        let mut out = Outbox::new();
        out.broadcast(node, n.children(), kind);
        self.flush(out, self.tick);
    }

    fn with_node(
        &mut self,
        node: NodeId,
        f: impl FnOnce(&mut Node, Ticks, &mut SimRng, &mut Outbox) -> bool,
    ) -> bool {
        let now = self.tick;
        let mut out = Outbox::new();
        let Some(n) = self.nodes.get_mut(node) else {
            return false;
        };
        let changed = f(n, now, &mut self.rng, &mut out);
        self.flush(out, now);
        changed
    }

    // -----------------------------------------------------------------------
    // Advance
    // -----------------------------------------------------------------------

    /// Run `ticks` steps.
    pub fn run(&mut self, ticks: Ticks) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Advance the line by one tick.
    pub fn step(&mut self) {
        let now = self.tick;
        self.phase_spawn(now);
        self.phase_arrive(now);
        self.phase_nodes(now);
        self.tick += 1;
    }

    fn phase_spawn(&mut self, now: Ticks) {
        let mut emitted = Vec::new();
        for (id, spawner) in self.spawners.iter_mut() {
            if spawner.poll(now) {
                if let Some(link) = self.spawner_links.get(id) {
                    emitted.push((id, *link));
                }
            }
        }
        for (spawner, link) in emitted {
            let item = self.new_item();
            self.events.push(LineEvent::ItemSpawned {
                spawner,
                item,
                tick: now,
            });
            self.dispatch(item, link, now);
        }
    }

    fn phase_arrive(&mut self, now: Ticks) {
        let mut in_flight = Vec::with_capacity(self.transits.len());
        for transit in std::mem::take(&mut self.transits) {
            if transit.arrive_at <= now {
                if let Some(line) = self.waiting.get_mut(transit.to) {
                    line.push_back(Waiting {
                        item: transit.item,
                        counted: false,
                    });
                }
            } else {
                in_flight.push(transit);
            }
        }
        self.transits = in_flight;

        for i in 0..self.order.len() {
            let id = self.order[i];
            self.admit_waiting(id, now);
        }
    }

    /// Offer `node`'s waiting line to it, head first, until one item pauses.
    fn admit_waiting(&mut self, id: NodeId, now: Ticks) {
        loop {
            let Some(front) = self.waiting.get(id).and_then(|w| w.front().copied()) else {
                return;
            };
            let Some(node) = self.nodes.get_mut(id) else {
                return;
            };
            let mut out = Outbox::new();
            let arrival = if front.counted {
                node.admit(front.item)
            } else {
                node.on_arrive(front.item, now, &mut out)
            };
            self.flush(out, now);

            if arrival == Arrival::Paused {
                if let Some(head) = self.waiting.get_mut(id).and_then(|w| w.front_mut()) {
                    if !head.counted {
                        head.counted = true;
                        self.events.push(LineEvent::ItemPaused {
                            node: id,
                            item: front.item,
                            tick: now,
                        });
                    }
                }
                return;
            }

            if let Some(w) = self.waiting.get_mut(id) {
                w.pop_front();
            }
            if let Some(zone) = self.inflow.get(id) {
                self.zones.leave(*zone);
            }
            if arrival == Arrival::PassThrough {
                self.pass_on(id, front.item, now);
            }
        }
    }

    fn phase_nodes(&mut self, now: Ticks) {
        for i in 0..self.order.len() {
            let id = self.order[i];
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let branch_states: Vec<NodeState> = node
                .branches()
                .iter()
                .filter_map(|b| self.nodes.get(b.node).map(Node::state))
                .collect();

            let mut out = Outbox::new();
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            let drained = node.tick(now, &self.zones, &branch_states, &mut self.rng, &mut out);
            let sink = node.is_sink();
            self.flush(out, now);

            if !sink {
                for item in drained {
                    self.forward(id, item, now);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Item movement
    // -----------------------------------------------------------------------

    /// An item passed through a running node.
    fn pass_on(&mut self, from: NodeId, item: ItemId, now: Ticks) {
        let Some(node) = self.nodes.get_mut(from) else {
            return;
        };
        if node.is_sink() {
            let mut out = Outbox::new();
            node.record_exit(item, now, &mut out);
            self.flush(out, now);
            return;
        }
        self.forward(from, item, now);
    }

    /// Send an item leaving `from` along its outlet.
    fn forward(&mut self, from: NodeId, item: ItemId, now: Ticks) {
        let link = match self.outlets.get(from) {
            None => {
                self.stray += 1;
                warn!(node = ?from, ?item, "item left a node without an outlet");
                return;
            }
            Some(Outlet::Next(link)) => *link,
            Some(Outlet::Branches(links)) => {
                let Some(node) = self.nodes.get(from) else {
                    return;
                };
                let branches: Vec<(Fixed64, bool)> = node
                    .branches()
                    .iter()
                    .map(|b| {
                        let available = self.nodes.get(b.node).is_some_and(|c| !is_blocked(c.state()));
                        (b.weight, available)
                    })
                    .collect();
                // A pressure-held branch point still drains; route it like
                // a degraded one.
                let parent = match node.state() {
                    NodeState::Hold | NodeState::Fault => NodeState::HalfHold,
                    s => s,
                };
                let draw = self.rng.next_unit();
                let index = pick_branch(&branches, parent, draw).unwrap_or(0);
                match links.get(index) {
                    Some(link) => *link,
                    None => return,
                }
            }
        };
        self.dispatch(item, link, now);
    }

    fn dispatch(&mut self, item: ItemId, link: Link, now: Ticks) {
        if let Some(zone) = self.inflow.get(link.to) {
            self.zones.enter(*zone);
        }
        self.transits.push(Transit {
            item,
            to: link.to,
            arrive_at: now.saturating_add(link.travel_ticks),
        });
    }

    // -----------------------------------------------------------------------
    // Signal delivery
    // -----------------------------------------------------------------------

    /// Record events and deliver signals until no reaction produces more.
    fn flush(&mut self, out: Outbox, now: Ticks) {
        let Outbox { signals, events } = out;
        for event in events {
            self.events.push(event);
        }
        let mut pending: VecDeque<Signal> = signals.into();
        while let Some(signal) = pending.pop_front() {
            let mut reaction = Outbox::new();
            match signal.to {
                Peer::Node(id) => match self.nodes.get_mut(id) {
                    Some(node) => deliver(node, signal, now, &mut reaction),
                    None => debug!(?signal, "signal to missing node skipped"),
                },
                Peer::Spawner(id) => match self.spawners.get_mut(id) {
                    Some(spawner) => deliver(spawner, signal, now, &mut reaction),
                    None => debug!(?signal, "signal to missing spawner skipped"),
                },
            }
            for event in reaction.events {
                self.events.push(event);
            }
            pending.extend(reaction.signals);
        }
    }
}

fn deliver<T: BackpressureTarget>(target: &mut T, signal: Signal, now: Ticks, out: &mut Outbox) {
    match signal.kind {
        SignalKind::Hold => target.on_upstream_hold(signal.from, now, out),
        SignalKind::Resume => target.on_upstream_resume(signal.from, now, out),
    }
}
