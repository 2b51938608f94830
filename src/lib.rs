//! Remote-control client for a six-wheeled rover
//!
//! Keeps a primary (control/telemetry) and a drive socket open to the rover
//! controller, reconnecting on failure, and fans decoded telemetry out to
//! registered listeners.

pub mod connection;
pub mod control;
pub mod events;
pub mod transport;
pub mod util;

pub use connection::{ConnectionConfig, ConnectionManager};
pub use control::{DriveStreamer, StreamerConfig};
pub use events::{ConnectionUpdate, PacketDispatcher, QualitySample};
pub use rover_shared::{ClientOptions, ConnectionState, Packet};
