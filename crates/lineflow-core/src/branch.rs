//! Branch-point resolution.
//!
//! A node with several branch children derives its own state from theirs:
//! all blocked means HOLD, a mix means HALF_HOLD, all available lets it run.
//! [`pick_branch`] is the companion routing rule that chooses which child an
//! item leaving the branch point is sent to.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::NodeId;
use crate::node::NodeState;

/// A weighted edge from a branch point to one of its alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchLink {
    pub node: NodeId,
    /// Relative routing weight; need not sum to one across links.
    pub weight: Fixed64,
}

/// HOLD and FAULT children cannot take items.
pub fn is_blocked(state: NodeState) -> bool {
    matches!(state, NodeState::Hold | NodeState::Fault)
}

/// Blocked/available tally over the live branch children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchCensus {
    pub blocked: u32,
    pub available: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchVerdict {
    AllBlocked,
    Mixed,
    AllAvailable,
}

impl BranchCensus {
    /// Classify each child state. Missing children are simply not counted.
    pub fn tally(states: impl IntoIterator<Item = NodeState>) -> Self {
        states.into_iter().fold(Self::default(), |mut census, state| {
            if is_blocked(state) {
                census.blocked += 1;
            } else {
                census.available += 1;
            }
            census
        })
    }

    pub fn active(&self) -> u32 {
        self.blocked + self.available
    }

    /// `None` when no child is live.
    pub fn verdict(&self) -> Option<BranchVerdict> {
        match (self.blocked, self.available) {
            (0, 0) => None,
            (_, 0) => Some(BranchVerdict::AllBlocked),
            (0, _) => Some(BranchVerdict::AllAvailable),
            _ => Some(BranchVerdict::Mixed),
        }
    }
}

/// Choose the branch an item leaving a branch point takes.
///
/// `branches` pairs each link's weight with whether that child is currently
/// available. While the parent is HALF_HOLD only available branches are
/// eligible and their weights are renormalised; in RUN every branch is
/// eligible. A parent in HOLD or FAULT routes nothing. `draw` is a uniform
/// sample in (0, 1]. If the eligible weights sum to zero the first eligible
/// branch wins.
pub fn pick_branch(
    branches: &[(Fixed64, bool)],
    parent: NodeState,
    draw: f64,
) -> Option<usize> {
    let eligible = |available: bool| match parent {
        NodeState::Run => true,
        NodeState::HalfHold => available,
        NodeState::Hold | NodeState::Fault => false,
    };

    let candidates: Vec<(usize, Fixed64)> = branches
        .iter()
        .enumerate()
        .filter(|(_, (_, available))| eligible(*available))
        .map(|(i, (weight, _))| (i, (*weight).max(Fixed64::ZERO)))
        .collect();

    let (first, _) = *candidates.first()?;
    let total: Fixed64 = candidates.iter().map(|(_, w)| *w).sum();
    if total <= Fixed64::ZERO {
        return Some(first);
    }

    let target = total * Fixed64::from_num(draw.clamp(0.0, 1.0));
    let mut cumulative = Fixed64::ZERO;
    for &(index, weight) in &candidates {
        cumulative += weight;
        if weight > Fixed64::ZERO && target <= cumulative {
            return Some(index);
        }
    }
    // Rounding can leave the target a hair above the sum.
    candidates
        .iter()
        .rev()
        .find(|(_, w)| *w > Fixed64::ZERO)
        .map(|(i, _)| *i)
}
