//! Lineflow Core -- the simulation core for production-line reliability
//! studies.
//!
//! Transport segments ("nodes") carry items toward sinks, fail after a
//! sampled number of items, buffer work while blocked, and push congestion
//! back upstream with HOLD/RESUME signals. The crate is deterministic: every
//! random draw comes from one seeded [`rng::SimRng`].
//!
//! # Node States
//!
//! | State      | Arrivals       | Drains           |
//! |------------|----------------|------------------|
//! | `Run`      | pass through   | full cadence     |
//! | `HalfHold` | buffered       | half cadence     |
//! | `Hold`     | buffered       | pressure-only    |
//! | `Fault`    | buffered       | none             |
//!
//! # Tick Pipeline
//!
//! Each call to [`line::Line::step`] runs spawners, delivers arrived items,
//! then ticks every node in insertion order. Signals a node emits are
//! delivered before the next node ticks.
//!
//! # Key Types
//!
//! - [`line::Line`] -- Owns nodes, spawners, zones and transits; runs ticks.
//! - [`node::Node`] -- Four-state segment with slot queue and failure counter.
//! - [`queue::SlotQueue`] -- Bounded FIFO over physical slots.
//! - [`failure::FailureSampler`] -- Constant, Gaussian and Exponential
//!   thresholds.
//! - [`backpressure::HoldLedger`] -- Per-sender HOLD reference counts.
//! - [`branch::pick_branch`] -- Weighted routing at branch points.
//! - [`event::EventLog`] -- Ring buffer of line events.

pub mod backpressure;
pub mod branch;
pub mod error;
pub mod event;
pub mod failure;
pub mod fixed;
pub mod id;
pub mod line;
pub mod node;
pub mod query;
pub mod queue;
pub mod rng;
pub mod spawner;
pub mod zone;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
