//! Receive watchdog
//!
//! Drops a link that has gone quiet for longer than the watchdog timeout and
//! publishes link-quality samples built from the gaps between receives.

use super::manager::Shared;
use crate::events::QualitySample;
use crate::util::RollingBuffer;
use rover_shared::ConnectionState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Watchdog task body; runs until the manager is disposed
pub(crate) async fn run(shared: Arc<Shared>) {
    let limit = shared.config.watchdog_timeout;
    let mut gaps = RollingBuffer::new(shared.config.quality_window);

    while !shared.is_disposed() {
        let cycle_start = Instant::now();
        let received = wait_for_receive(&shared, cycle_start, limit).await;

        if shared.is_disposed() {
            break;
        }
        if received {
            shared.receive_latch.reset();
        }

        if shared.state() != ConnectionState::Connected || !shared.is_running() {
            continue;
        }

        if received {
            let gap = quiet_since(&shared, cycle_start).elapsed();
            gaps.push(gap.as_millis() as i64);
            let sample = QualitySample {
                avg_gap_ms: gaps.average(),
                spread_ms: gaps.spread(),
            };
            debug!(
                "Link quality: avg {}ms spread {}ms",
                sample.avg_gap_ms, sample.spread_ms
            );
            shared.dispatcher.dispatch_quality(sample);
            continue;
        }

        warn!("Nothing received for {:?}, dropping link", limit);
        if let Err(e) = shared.close_link() {
            if shared.state() == ConnectionState::Connected {
                error!("Watchdog could not close the link: {}; stopping", e);
                shared.stop();
            }
        }
    }

    info!("Watchdog exiting");
}

/// Start of the current silent stretch: the cycle start, or the link's
/// establishment if that came later
fn quiet_since(shared: &Shared, cycle_start: Instant) -> Instant {
    shared
        .link_opened_at()
        .map_or(cycle_start, |opened| opened.max(cycle_start))
}

/// Wait for the receive signal until the link has been silent for `limit`
///
/// A link established during the cycle gets the full `limit` from its
/// establishment, not from the cycle start.
async fn wait_for_receive(shared: &Shared, cycle_start: Instant, limit: Duration) -> bool {
    let mut remaining = limit;
    loop {
        if shared.receive_latch.wait_timeout(remaining).await {
            return true;
        }
        if shared.is_disposed() {
            return false;
        }
        let silent = quiet_since(shared, cycle_start).elapsed();
        if silent >= limit {
            return false;
        }
        remaining = limit - silent;
    }
}
