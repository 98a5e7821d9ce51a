//! Bounded slot buffer with FIFO drain order.
//!
//! A [`SlotQueue`] owns a fixed set of addressable slots. Admission happens
//! only through [`SlotQueue::try_take_tail_slot`], which reserves the first
//! free slot scanning from the configured tail end. A reserved slot becomes
//! held once an item is [`enqueue`](SlotQueue::enqueue)d into it. Drain order
//! follows enqueue order, independent of slot positions.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::fixed::{Fixed64, ratio};
use crate::id::{ItemId, SlotId};

/// Which end of the slot array new arrivals are placed at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TailEnd {
    /// Scan from slot 0 upward.
    First,
    /// Scan from the last slot downward.
    #[default]
    Last,
}

/// Occupancy of one physical slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Free,
    /// Taken by the admission gate, item not yet registered.
    Reserved,
    Held(ItemId),
}

/// Fixed-capacity buffer of item slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotQueue {
    slots: Vec<SlotState>,
    /// Held slots, earliest enqueued first.
    order: VecDeque<SlotId>,
    tail_end: TailEnd,
    /// Reserved + held slot count.
    occupied: u32,
}

impl SlotQueue {
    /// Create a queue with `capacity` free slots.
    pub fn new(capacity: u32, tail_end: TailEnd) -> Self {
        Self {
            slots: vec![SlotState::Free; capacity as usize],
            order: VecDeque::with_capacity(capacity as usize),
            tail_end,
            occupied: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Occupied slots, including reserved ones still awaiting an item.
    pub fn count(&self) -> u32 {
        self.occupied
    }

    /// `count / capacity`, or zero for a zero-capacity queue.
    pub fn fill_ratio(&self) -> Fixed64 {
        ratio(self.count(), self.capacity())
    }

    pub fn is_full(&self) -> bool {
        self.occupied >= self.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    pub fn tail_end(&self) -> TailEnd {
        self.tail_end
    }

    pub fn slot(&self, slot: SlotId) -> Option<SlotState> {
        self.slots.get(slot.0 as usize).copied()
    }

    /// Reserve the first free slot scanning from the tail end.
    pub fn try_take_tail_slot(&mut self) -> Option<SlotId> {
        let index = match self.tail_end {
            TailEnd::First => self.slots.iter().position(|s| *s == SlotState::Free),
            TailEnd::Last => self.slots.iter().rposition(|s| *s == SlotState::Free),
        }?;
        self.slots[index] = SlotState::Reserved;
        self.occupied += 1;
        Some(SlotId(index as u32))
    }

    /// Register `item` in a slot previously returned by
    /// [`try_take_tail_slot`](Self::try_take_tail_slot) and append it to the
    /// FIFO order. Returns `false` (and changes nothing) if the slot is not
    /// reserved.
    #[must_use]
    pub fn enqueue(&mut self, item: ItemId, slot: SlotId) -> bool {
        match self.slots.get_mut(slot.0 as usize) {
            Some(state @ SlotState::Reserved) => {
                *state = SlotState::Held(item);
                self.order.push_back(slot);
                true
            }
            _ => false,
        }
    }

    /// Take-and-enqueue in one step. Returns the slot used, or `None` if the
    /// queue is full.
    pub fn try_admit(&mut self, item: ItemId) -> Option<SlotId> {
        let slot = self.try_take_tail_slot()?;
        let registered = self.enqueue(item, slot);
        debug_assert!(registered, "freshly reserved slot must accept an item");
        Some(slot)
    }

    /// Remove the earliest-enqueued item and free its slot.
    pub fn try_pop_head(&mut self) -> Option<(ItemId, SlotId)> {
        let slot = self.order.pop_front()?;
        let state = std::mem::replace(&mut self.slots[slot.0 as usize], SlotState::Free);
        self.occupied -= 1;
        match state {
            SlotState::Held(item) => Some((item, slot)),
            // order only ever contains held slots
            SlotState::Free | SlotState::Reserved => {
                debug_assert!(false, "FIFO entry pointed at a non-held slot");
                None
            }
        }
    }

    /// Peek the earliest-enqueued item without removing it.
    pub fn head(&self) -> Option<ItemId> {
        let slot = *self.order.front()?;
        match self.slots[slot.0 as usize] {
            SlotState::Held(item) => Some(item),
            _ => None,
        }
    }

    /// Release a slot regardless of what it holds. Returns the item that was
    /// held there, if any. Freeing a free or out-of-range slot is a no-op.
    pub fn free_slot(&mut self, slot: SlotId) -> Option<ItemId> {
        let state = self.slots.get_mut(slot.0 as usize)?;
        let previous = std::mem::replace(state, SlotState::Free);
        match previous {
            SlotState::Free => None,
            SlotState::Reserved => {
                self.occupied -= 1;
                None
            }
            SlotState::Held(item) => {
                self.occupied -= 1;
                self.order.retain(|s| *s != slot);
                Some(item)
            }
        }
    }

    /// Items in drain order.
    pub fn items(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.order.iter().filter_map(|slot| match self.slots[slot.0 as usize] {
            SlotState::Held(item) => Some(item),
            _ => None,
        })
    }

    /// FIFO order and held-slot set agree, and the occupancy counter matches
    /// the slot array.
    pub fn is_consistent(&self) -> bool {
        let held = self
            .slots
            .iter()
            .filter(|s| matches!(s, SlotState::Held(_)))
            .count();
        let taken = self.slots.iter().filter(|s| **s != SlotState::Free).count();
        held == self.order.len()
            && taken == self.occupied as usize
            && self
                .order
                .iter()
                .all(|slot| matches!(self.slots[slot.0 as usize], SlotState::Held(_)))
            && self.occupied <= self.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifth_take_on_capacity_four_fails_until_pop() {
        let mut queue = SlotQueue::new(4, TailEnd::Last);
        for i in 0..4 {
            let slot = queue.try_take_tail_slot().expect("slot available");
            assert!(queue.enqueue(ItemId(i), slot));
        }
        assert!(queue.try_take_tail_slot().is_none());
        assert!(queue.is_full());

        assert_eq!(queue.try_pop_head().map(|(item, _)| item), Some(ItemId(0)));
        assert!(queue.try_take_tail_slot().is_some());
        assert!(queue.is_consistent());
    }

    #[test]
    fn tail_end_last_fills_from_the_back() {
        let mut queue = SlotQueue::new(3, TailEnd::Last);
        assert_eq!(queue.try_take_tail_slot(), Some(SlotId(2)));
        assert_eq!(queue.try_take_tail_slot(), Some(SlotId(1)));
    }

    #[test]
    fn tail_end_first_fills_from_the_front() {
        let mut queue = SlotQueue::new(3, TailEnd::First);
        assert_eq!(queue.try_take_tail_slot(), Some(SlotId(0)));
        assert_eq!(queue.try_take_tail_slot(), Some(SlotId(1)));
    }

    #[test]
    fn pop_order_follows_enqueue_not_slot_position() {
        let mut queue = SlotQueue::new(3, TailEnd::First);
        let a = queue.try_take_tail_slot().unwrap();
        let b = queue.try_take_tail_slot().unwrap();
        // Enqueue into slot 1 before slot 0.
        assert!(queue.enqueue(ItemId(10), b));
        assert!(queue.enqueue(ItemId(20), a));

        assert_eq!(queue.try_pop_head(), Some((ItemId(10), b)));
        // Freed slot 1 is reused ahead of slot 2, but FIFO still favours 20.
        let c = queue.try_take_tail_slot().unwrap();
        assert_eq!(c, b);
        assert!(queue.enqueue(ItemId(30), c));
        assert_eq!(queue.items().collect::<Vec<_>>(), vec![ItemId(20), ItemId(30)]);
    }

    #[test]
    fn enqueue_requires_reserved_slot() {
        let mut queue = SlotQueue::new(2, TailEnd::Last);
        assert!(!queue.enqueue(ItemId(1), SlotId(0)));
        assert!(!queue.enqueue(ItemId(1), SlotId(9)));
        let slot = queue.try_take_tail_slot().unwrap();
        assert!(queue.enqueue(ItemId(1), slot));
        assert!(!queue.enqueue(ItemId(2), slot), "held slot cannot be reused");
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn free_slot_removes_fifo_entry() {
        let mut queue = SlotQueue::new(3, TailEnd::Last);
        let s0 = queue.try_admit(ItemId(1)).unwrap();
        queue.try_admit(ItemId(2)).unwrap();
        assert_eq!(queue.free_slot(s0), Some(ItemId(1)));
        assert_eq!(queue.count(), 1);
        assert_eq!(queue.head(), Some(ItemId(2)));
        assert!(queue.is_consistent());

        // Freeing again is harmless.
        assert_eq!(queue.free_slot(s0), None);
        assert_eq!(queue.count(), 1);
    }

    #[test]
    fn free_reserved_slot_releases_capacity() {
        let mut queue = SlotQueue::new(1, TailEnd::Last);
        let slot = queue.try_take_tail_slot().unwrap();
        assert!(queue.is_full());
        assert_eq!(queue.free_slot(slot), None);
        assert!(queue.is_empty());
        assert!(queue.is_consistent());
    }

    #[test]
    fn zero_capacity_queue() {
        let mut queue = SlotQueue::new(0, TailEnd::Last);
        assert_eq!(queue.fill_ratio(), Fixed64::ZERO);
        assert!(queue.is_full());
        assert!(queue.is_empty());
        assert!(queue.try_take_tail_slot().is_none());
    }

    #[test]
    fn fill_ratio_tracks_count() {
        let mut queue = SlotQueue::new(4, TailEnd::Last);
        queue.try_admit(ItemId(1));
        assert_eq!(queue.fill_ratio(), Fixed64::from_num(0.25));
        queue.try_admit(ItemId(2));
        assert_eq!(queue.fill_ratio(), Fixed64::from_num(0.5));
    }
}
