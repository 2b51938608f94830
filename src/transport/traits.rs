//! Transport trait abstraction for pluggable network backends

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A transport stream that can read and write bytes
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Factory for creating transport connections
///
/// The connection manager dials twice per attempt (primary then drive
/// socket) and applies its own connect timeout around each call.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Attempt to connect to `addr`, returning a stream on success
    async fn dial(&self, addr: &str) -> Result<Box<dyn TransportStream>>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
