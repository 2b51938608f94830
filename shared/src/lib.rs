//! Rover Shared Protocol Types
//!
//! This crate provides the packet types, line codec and connection state
//! machine shared by the rover control client and the rover simulator.

pub mod codec;
pub mod packet;
pub mod state_machine;

// Re-export commonly used types at crate root
pub use codec::{CodecError, FrameDecoder, WireMessage};
pub use packet::*;
pub use state_machine::{ConnectionState, LinkEvent, LinkStateMachine, TransitionResult};

/// Timing parameters for the rover link
pub mod timing {
    /// Timeout for opening each socket
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;

    /// Fixed delay between connection attempts
    pub const RECONNECT_BACKOFF_MS: u64 = 100;

    /// Watchdog timeout - the link is dropped if nothing is received for this long
    pub const WATCHDOG_TIMEOUT_MS: u64 = 5000;

    /// Number of receive intervals kept for quality statistics
    pub const QUALITY_WINDOW: usize = 20;

    /// Bounded wait for background tasks during dispose
    pub const DISPOSE_TIMEOUT_MS: u64 = 10000;

    /// Drive command streaming interval
    pub const DRIVE_INTERVAL_MS: u64 = 50;

    /// Health request interval
    pub const HEALTH_INTERVAL_MS: u64 = 500;

    /// Telemetry streaming interval used by the simulator
    pub const TELEMETRY_INTERVAL_MS: u64 = 100;
}
