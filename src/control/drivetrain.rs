//! Joystick to wheel-side mixing

/// Map joystick axes to left/right drive levels
///
/// The rover takes tank-style input directly, so this is a passthrough. Output
/// is not clamped here; the wire codec clamps and quantizes on send.
pub fn mix(x: f64, y: f64) -> (f64, f64) {
    (x, y)
}
