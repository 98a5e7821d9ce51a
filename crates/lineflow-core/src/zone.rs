//! Approach-zone inflow counters.
//!
//! A zone counts items physically between an upstream point and a node's
//! queue entrance. Counts are written by whoever moves items (trigger
//! collaborators, or the line's transit model) and only read by nodes when
//! predicting load.

use slotmap::SlotMap;

use crate::id::ZoneId;

/// Registry of approach-zone counters.
#[derive(Debug, Clone, Default)]
pub struct ApproachZones {
    counts: SlotMap<ZoneId, u32>,
}

impl ApproachZones {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, empty zone.
    pub fn register(&mut self) -> ZoneId {
        self.counts.insert(0)
    }

    pub fn contains(&self, zone: ZoneId) -> bool {
        self.counts.contains_key(zone)
    }

    /// An item entered the zone.
    pub fn enter(&mut self, zone: ZoneId) {
        if let Some(count) = self.counts.get_mut(zone) {
            *count += 1;
        }
    }

    /// An item left the zone. Clamped at zero.
    pub fn leave(&mut self, zone: ZoneId) {
        if let Some(count) = self.counts.get_mut(zone) {
            *count = count.saturating_sub(1);
        }
    }

    /// Current count of a zone; unknown zones count as empty.
    pub fn count(&self, zone: ZoneId) -> u32 {
        self.counts.get(zone).copied().unwrap_or(0)
    }

    /// Sum of the given zones' counts.
    pub fn total(&self, zones: &[ZoneId]) -> u32 {
        zones.iter().map(|z| self.count(*z)).sum()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
