//! Scripted dialer over in-memory pipes for connection tests

use crate::transport::{Dialer, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[async_trait]
impl TransportStream for DuplexStream {
    async fn shutdown(&mut self) -> Result<()> {
        AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// Dialer whose outcomes follow a script; dials past the end of the script succeed
///
/// The rover side of every successful dial is sent to the test through the
/// channel returned by [`ScriptedDialer::new`], in dial order (primary, then
/// drive socket).
pub(crate) struct ScriptedDialer {
    script: Mutex<VecDeque<bool>>,
    dial_times: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<DuplexStream>,
}

impl ScriptedDialer {
    pub(crate) fn new(script: impl IntoIterator<Item = bool>) -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let dialer = Self {
            script: Mutex::new(script.into_iter().collect()),
            dial_times: Mutex::new(Vec::new()),
            peers,
        };
        (dialer, peer_rx)
    }

    pub(crate) fn always_succeeds() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::new([])
    }

    pub(crate) fn dial_count(&self) -> usize {
        self.dial_times.lock().len()
    }

    pub(crate) fn dial_times(&self) -> Vec<Instant> {
        self.dial_times.lock().clone()
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, _addr: &str) -> Result<Box<dyn TransportStream>> {
        self.dial_times.lock().push(Instant::now());

        let succeed = self.script.lock().pop_front().unwrap_or(true);
        if !succeed {
            return Err(anyhow!("scripted connection refused"));
        }

        let (local, remote) = duplex(4096);
        self.peers
            .send(remote)
            .map_err(|_| anyhow!("test dropped the peer receiver"))?;
        Ok(Box::new(local))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Dialer whose connection attempts never complete
#[derive(Default)]
pub(crate) struct PendingDialer {
    dials: AtomicUsize,
}

impl PendingDialer {
    pub(crate) fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for PendingDialer {
    async fn dial(&self, _addr: &str) -> Result<Box<dyn TransportStream>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    fn name(&self) -> &'static str {
        "pending"
    }
}
