use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// Used for fill ratios, hysteresis thresholds and branch weights so that
/// threshold comparisons are exact and identical on every platform.
pub type Fixed64 = I32F32;

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

/// Convert an f64 to Fixed64. Use only for configuration, never in the tick loop.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// Convert Fixed64 to f64. Use only for display and observation vectors.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// `numerator / denominator` as a fixed-point ratio. A zero denominator
/// yields zero rather than a division fault.
#[inline]
pub fn ratio(numerator: u32, denominator: u32) -> Fixed64 {
    if denominator == 0 {
        return Fixed64::ZERO;
    }
    Fixed64::from_num(numerator) / Fixed64::from_num(denominator)
}
