use crate::fixed::Fixed64;

/// Errors raised while building or wiring a line.
///
/// Runtime operations (arrivals, ticks, hold/resume signals, failures and
/// repairs) never fail; these only surface from setup calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LineError {
    /// A node handle does not refer to a live node.
    #[error("unknown node {detail}")]
    UnknownNode { detail: String },

    /// A spawner handle does not refer to a live spawner.
    #[error("unknown spawner {detail}")]
    UnknownSpawner { detail: String },

    /// An approach-zone handle does not refer to a registered zone.
    #[error("unknown approach zone {detail}")]
    UnknownZone { detail: String },

    /// The resume threshold must lie in [0, 1) so it stays strictly below
    /// the hold threshold.
    #[error("resume ratio {ratio} must be >= 0 and < 1")]
    InvalidResumeRatio { ratio: Fixed64 },

    /// Failure distribution parameters cannot produce a threshold.
    #[error("invalid failure model: {detail}")]
    InvalidFailureModel { detail: String },

    /// A node was wired to itself.
    #[error("node cannot be wired to itself ({role})")]
    SelfLink { role: &'static str },

    /// A node already routes its items elsewhere. A node has either one
    /// downstream link or a set of branches, never both.
    #[error("node {detail} already has an outlet")]
    OutletTaken { detail: String },

    /// A branch weight was negative.
    #[error("branch weight {weight} must be non-negative")]
    NegativeBranchWeight { weight: Fixed64 },
}
