//! Numeric helpers shared by the scorers.

/// Divide, resolving a zero denominator by the numerator.
///
/// `0 / 0` is a perfect match (both sides empty) and resolves to `1`; any other
/// numerator over zero resolves to `0`.
pub fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        if numerator == 0.0 {
            return 1.0;
        }
        return 0.0;
    }
    numerator / denominator
}

/// Clamp into `[0, 1]`. Non-finite values collapse to `0`.
pub fn clamp01(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
