//! Deterministic PRNG for failure sampling and branch routing.
//!
//! Uses the SplitMix64 algorithm: fast, 8 bytes of state, excellent
//! statistical properties, and trivially serializable.

/// A source of uniform draws in the half-open interval (0, 1].
///
/// Failure sampling and branch routing only ever consume uniforms through
/// this trait, so a fixed sequence of draws reproduces the same thresholds
/// and routing decisions.
pub trait UniformSource {
    /// Next uniform draw in (0, 1]. Never returns 0, so `ln(u)` is finite.
    fn next_unit(&mut self) -> f64;
}

/// SplitMix64 pseudo-random number generator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// Create a new RNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Get the internal state (for hashing/serialization).
    pub fn state(&self) -> u64 {
        self.state
    }
}

impl UniformSource for SimRng {
    fn next_unit(&mut self) -> f64 {
        // 53 random mantissa bits, shifted by one so the range is (0, 1].
        let bits = (self.next_u64() >> 11) + 1;
        bits as f64 / (1u64 << 53) as f64
    }
}
