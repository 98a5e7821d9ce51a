//! HOLD/RESUME signalling between nodes and their producers.
//!
//! A congested node asserts HOLD to its children (the nodes and spawners
//! that feed it) and later rescinds it with RESUME. Receivers keep a
//! [`HoldLedger`] per sender, so every HOLD is matched by exactly one RESUME
//! from the same sender and unmatched resumes are detectable.
//!
//! Receivers form a closed set ([`Peer`]) dispatched through the
//! [`BackpressureTarget`] trait. Signals produced while handling another
//! signal are collected in an [`Outbox`] and delivered by the line.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::LineEvent;
use crate::fixed::Ticks;
use crate::id::{NodeId, SpawnerId};

/// Anything that can be told to hold or resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Peer {
    Node(NodeId),
    Spawner(SpawnerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Hold,
    Resume,
}

/// One HOLD or RESUME from `from` addressed to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub from: NodeId,
    pub to: Peer,
    pub kind: SignalKind,
}

/// Side effects collected while a node or spawner reacts: outgoing signals
/// and log events. Drained by the line after each call.
#[derive(Debug, Default)]
pub struct Outbox {
    pub signals: Vec<Signal>,
    pub events: Vec<LineEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `kind` from `from` to every peer in `children`.
    pub fn broadcast(&mut self, from: NodeId, children: &[Peer], kind: SignalKind) {
        self.signals
            .extend(children.iter().map(|&to| Signal { from, to, kind }));
    }

    pub fn emit(&mut self, event: LineEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.events.is_empty()
    }
}

/// Receiver side of the protocol.
pub trait BackpressureTarget {
    /// An upstream node asserted HOLD.
    fn on_upstream_hold(&mut self, sender: NodeId, now: Ticks, out: &mut Outbox);
    /// An upstream node rescinded a HOLD it asserted earlier.
    fn on_upstream_resume(&mut self, sender: NodeId, now: Ticks, out: &mut Outbox);
}

/// What a resume did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The last outstanding hold was released.
    Cleared,
    /// Other holds remain outstanding.
    StillHeld,
    /// The sender had no outstanding hold; nothing changed.
    Unmatched,
}

/// Outstanding upstream holds, counted per sender.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldLedger {
    holders: BTreeMap<NodeId, u32>,
    total: u32,
}

impl HoldLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&mut self, sender: NodeId) {
        *self.holders.entry(sender).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn release(&mut self, sender: NodeId) -> Release {
        let Some(count) = self.holders.get_mut(&sender) else {
            return Release::Unmatched;
        };
        *count -= 1;
        if *count == 0 {
            self.holders.remove(&sender);
        }
        self.total -= 1;
        if self.total == 0 {
            Release::Cleared
        } else {
            Release::StillHeld
        }
    }

    /// Total outstanding holds across all senders.
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_held(&self) -> bool {
        self.total > 0
    }

    /// Outstanding holds from one sender.
    pub fn held_by(&self, sender: NodeId) -> u32 {
        self.holders.get(&sender).copied().unwrap_or(0)
    }
}
