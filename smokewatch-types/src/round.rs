//! Decimal rounding helpers.

/// Round `value` to `decimals` places, resolving exact ties to the even
/// neighbour.
///
/// Rounding works on the exact decimal expansion of the binary value, so
/// `150.025` (stored just above the tie) rounds up and `0.015` (stored just
/// below) rounds down. Only values that are exactly representable ties, such
/// as `0.125`, go to the even neighbour.
pub fn round_half_even(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{:.*}", decimals as usize, value)
        .parse()
        .unwrap_or(value)
}
