//! Byte-stream transports used by the connection manager

pub mod tcp;
pub mod traits;

pub use tcp::{TcpDialer, TcpTransportStream};
pub use traits::{Dialer, TransportStream};
