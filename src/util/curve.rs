//! Response curves used for quality scoring

/// Inverse curve through a pivot point
///
/// Returns `pivot_y` at `x == pivot_x` and falls off as `x` grows.
/// `falloff` controls the steepness: 0 gives a flat line, 1 equal influence
/// either side of the pivot, larger values a sharper drop after it.
pub fn inverse_curve(x: f64, pivot_x: f64, pivot_y: f64, falloff: f64) -> f64 {
    debug_assert!(falloff >= 0.0);
    (pivot_x + 1.0).powf(falloff) * pivot_y / (x + 1.0).powf(falloff)
}
