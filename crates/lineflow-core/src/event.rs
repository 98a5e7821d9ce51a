//! Line events recorded into a pre-allocated ring buffer.
//!
//! Nodes and spawners emit events while they react; the line appends them to
//! its [`EventLog`] in emission order. Telemetry and reward collaborators
//! read the log or subscribe passive listeners. Suppressed kinds are never
//! recorded.

use crate::fixed::Ticks;
use crate::id::{ItemId, NodeId, SpawnerId};
use crate::node::NodeState;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A line event. All events carry the tick at which they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    StateChanged {
        node: NodeId,
        from: NodeState,
        to: NodeState,
        tick: Ticks,
    },
    NodeFailed {
        node: NodeId,
        /// Items carried since the previous repair.
        items: u64,
        forced: bool,
        tick: Ticks,
    },
    NodeRepaired {
        node: NodeId,
        automatic: bool,
        tick: Ticks,
    },
    /// The node asserted a queue-pressure HOLD to its children.
    HoldAsserted { node: NodeId, tick: Ticks },
    /// The node rescinded its queue-pressure HOLD.
    HoldRescinded { node: NodeId, tick: Ticks },
    /// An item was drained out of a sink.
    ItemExited {
        node: NodeId,
        item: ItemId,
        tick: Ticks,
    },
    ItemSpawned {
        spawner: SpawnerId,
        item: ItemId,
        tick: Ticks,
    },
    /// An arriving item found no free slot and waits at the entrance.
    ItemPaused {
        node: NodeId,
        item: ItemId,
        tick: Ticks,
    },
}

/// Discriminant tag for event types, used for suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    NodeFailed,
    NodeRepaired,
    HoldAsserted,
    HoldRescinded,
    ItemExited,
    ItemSpawned,
    ItemPaused,
}

const EVENT_KIND_COUNT: usize = 8;

impl LineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LineEvent::StateChanged { .. } => EventKind::StateChanged,
            LineEvent::NodeFailed { .. } => EventKind::NodeFailed,
            LineEvent::NodeRepaired { .. } => EventKind::NodeRepaired,
            LineEvent::HoldAsserted { .. } => EventKind::HoldAsserted,
            LineEvent::HoldRescinded { .. } => EventKind::HoldRescinded,
            LineEvent::ItemExited { .. } => EventKind::ItemExited,
            LineEvent::ItemSpawned { .. } => EventKind::ItemSpawned,
            LineEvent::ItemPaused { .. } => EventKind::ItemPaused,
        }
    }

    pub fn tick(&self) -> Ticks {
        match *self {
            LineEvent::StateChanged { tick, .. }
            | LineEvent::NodeFailed { tick, .. }
            | LineEvent::NodeRepaired { tick, .. }
            | LineEvent::HoldAsserted { tick, .. }
            | LineEvent::HoldRescinded { tick, .. }
            | LineEvent::ItemExited { tick, .. }
            | LineEvent::ItemSpawned { tick, .. }
            | LineEvent::ItemPaused { tick, .. } => tick,
        }
    }
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// A passive listener receives every recorded event, read-only.
pub type PassiveListener = Box<dyn FnMut(&LineEvent)>;

/// Fixed-capacity ring buffer of events. When full, the oldest events are
/// dropped.
pub struct EventLog {
    events: Vec<Option<LineEvent>>,
    /// Next write position.
    head: usize,
    len: usize,
    total_written: u64,
    dropped: u64,
    suppressed: [bool; EVENT_KIND_COUNT],
    listeners: Vec<PassiveListener>,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("capacity", &self.capacity())
            .field("len", &self.len)
            .field("total_written", &self.total_written)
            .field("dropped", &self.dropped)
            .field("suppressed", &self.suppressed)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventLog {
    /// Create a log with the given capacity. A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
            dropped: 0,
            suppressed: [false; EVENT_KIND_COUNT],
            listeners: Vec::new(),
        }
    }

    /// Stop recording (and delivering) events of `kind`.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind as usize] = true;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind as usize]
    }

    /// Register a passive listener called for every recorded event.
    pub fn subscribe(&mut self, listener: PassiveListener) {
        self.listeners.push(listener);
    }

    /// Record an event. Suppressed kinds are dropped without a trace.
    pub fn push(&mut self, event: LineEvent) {
        if self.is_suppressed(event.kind()) {
            return;
        }
        for listener in &mut self.listeners {
            listener(&event);
        }
        let capacity = self.capacity();
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % capacity;
        if self.len < capacity {
            self.len += 1;
        } else {
            self.dropped += 1;
        }
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Events recorded since creation, including dropped ones.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Events dropped because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &LineEvent> + '_ {
        let start = if self.len < self.capacity() { 0 } else { self.head };
        (0..self.len).filter_map(move |i| self.events[(start + i) % self.capacity()].as_ref())
    }

    /// Remove every stored event. Counters and listeners are kept.
    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn node() -> NodeId {
        let mut map: SlotMap<NodeId, ()> = SlotMap::with_key();
        map.insert(())
    }

    fn hold(tick: Ticks) -> LineEvent {
        LineEvent::HoldAsserted { node: node(), tick }
    }

    #[test]
    fn ring_drops_oldest() {
        let mut log = EventLog::new(2);
        log.push(hold(1));
        log.push(hold(2));
        log.push(hold(3));
        let ticks: Vec<_> = log.iter().map(LineEvent::tick).collect();
        assert_eq!(ticks, vec![2, 3]);
        assert_eq!(log.dropped_count(), 1);
        assert_eq!(log.total_written(), 3);
    }

    #[test]
    fn clear_does_not_invent_drops() {
        let mut log = EventLog::new(2);
        log.push(hold(1));
        log.push(hold(2));
        log.clear();
        log.push(hold(3));
        log.push(hold(4));
        assert_eq!(log.dropped_count(), 0);
        assert_eq!(log.total_written(), 4);

        log.push(hold(5));
        assert_eq!(log.dropped_count(), 1);
        let ticks: Vec<_> = log.iter().map(LineEvent::tick).collect();
        assert_eq!(ticks, vec![4, 5]);
    }

    #[test]
    fn suppressed_kinds_are_not_recorded() {
        let mut log = EventLog::new(8);
        log.suppress(EventKind::HoldAsserted);
        log.push(hold(1));
        log.push(LineEvent::HoldRescinded { node: node(), tick: 2 });
        assert_eq!(log.len(), 1);
        assert_eq!(log.iter().next().map(LineEvent::kind), Some(EventKind::HoldRescinded));
    }

    #[test]
    fn listeners_see_every_event() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut log = EventLog::new(1);
        log.subscribe(Box::new(move |e| sink.borrow_mut().push(e.tick())));
        log.push(hold(4));
        log.push(hold(5));
        assert_eq!(*seen.borrow(), vec![4, 5]);
    }

    #[test]
    fn zero_capacity_clamped() {
        let mut log = EventLog::new(0);
        assert_eq!(log.capacity(), 1);
        log.push(hold(1));
        log.clear();
        assert!(log.is_empty());
    }
}
