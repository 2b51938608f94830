//! Events published to collaborators (typically a UI)
//!
//! Two independent channels are exposed:
//! - decoded telemetry packets, one callback per packet
//! - connection updates: status transitions and quality samples

mod dispatcher;

pub use dispatcher::{ConnectionListener, ListenerId, PacketDispatcher, PacketListener};

use crate::util::inverse_curve;

/// Receive-interval statistics computed by the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QualitySample {
    /// Rolling average gap between receive signals, milliseconds
    pub avg_gap_ms: i64,
    /// Rolling max - min of the gaps, milliseconds
    pub spread_ms: i64,
}

impl QualitySample {
    /// Link quality score, nominally 0..=100 but unbounded above
    ///
    /// Half comes from latency (an average gap of 100 ms scores 50) and half
    /// from consistency (a spread of 1 ms scores 50).
    pub fn score(&self) -> f64 {
        inverse_curve(self.avg_gap_ms as f64, 100.0, 50.0, 1.2)
            + inverse_curve(self.spread_ms as f64, 1.0, 50.0, 0.2)
    }
}

/// Update on the connection channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionUpdate {
    /// The link went up or down
    Status { connected: bool },
    /// A new quality sample is available
    Quality(QualitySample),
}
