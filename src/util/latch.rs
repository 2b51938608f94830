//! Waitable latch
//!
//! A binary gate shared between tasks: any number of waiters block until the
//! gate is opened, and it stays open until explicitly reset.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Manually reset binary gate
#[derive(Debug)]
pub struct WaitableLatch {
    state: watch::Sender<bool>,
}

impl WaitableLatch {
    /// Create a latch, initially open or closed
    pub fn new(open: bool) -> Self {
        let (state, _) = watch::channel(open);
        Self { state }
    }

    /// Open the gate and wake every waiter
    pub fn set(&self) {
        self.state.send_if_modified(|open| !std::mem::replace(open, true));
    }

    /// Close the gate
    pub fn reset(&self) {
        self.state.send_replace(false);
    }

    /// Whether the gate is currently open
    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the gate is open
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Wait until the gate is open or `limit` elapses; returns whether it opened
    pub async fn wait_timeout(&self, limit: Duration) -> bool {
        timeout(limit, self.wait()).await.is_ok()
    }
}

impl Default for WaitableLatch {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_open_latch_returns_immediately() {
        let latch = WaitableLatch::new(true);
        let start = Instant::now();
        latch.wait().await;
        assert!(latch.wait_timeout(Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_wait_blocks_until_set() {
        let latch = Arc::new(WaitableLatch::new(false));

        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move {
                latch.wait().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        latch.set();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter panicked");
    }

    #[tokio::test]
    async fn test_set_wakes_all_waiters() {
        let latch = Arc::new(WaitableLatch::new(false));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let latch = latch.clone();
                tokio::spawn(async move { latch.wait_timeout(Duration::from_secs(2)).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        latch.set();

        for waiter in waiters {
            assert!(waiter.await.expect("waiter panicked"));
        }
    }

    #[tokio::test]
    async fn test_wait_timeout_on_closed_latch() {
        let latch = WaitableLatch::new(false);
        let start = Instant::now();

        assert!(!latch.wait_timeout(Duration::from_millis(100)).await);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_wait_timeout_sees_set_first() {
        let latch = Arc::new(WaitableLatch::new(false));

        let setter = {
            let latch = latch.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                latch.set();
            })
        };

        assert!(latch.wait_timeout(Duration::from_secs(2)).await);
        setter.await.expect("setter panicked");
    }

    #[tokio::test]
    async fn test_reset_closes_again() {
        let latch = WaitableLatch::new(false);

        latch.set();
        latch.set();
        assert!(latch.is_set());

        latch.reset();
        assert!(!latch.is_set());
        assert!(!latch.wait_timeout(Duration::from_millis(30)).await);
    }
}
