//! Periodic drive and health scheduling

use super::drivetrain;
use crate::connection::ConnectionManager;
use anyhow::Result;
use rover_shared::timing;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Latest joystick position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriveInput {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamerConfig {
    /// Drive command period
    pub drive_interval: Duration,
    /// Health request period
    pub health_interval: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            drive_interval: Duration::from_millis(timing::DRIVE_INTERVAL_MS),
            health_interval: Duration::from_millis(timing::HEALTH_INTERVAL_MS),
        }
    }
}

/// Streams the operator's drive input to the rover at a fixed rate
///
/// Also polls health on a slower period. Both only fire while the manager is
/// connected.
pub struct DriveStreamer {
    manager: Arc<ConnectionManager>,
    input: watch::Sender<DriveInput>,
    config: StreamerConfig,
}

impl DriveStreamer {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self::with_config(manager, StreamerConfig::default())
    }

    pub fn with_config(manager: Arc<ConnectionManager>, config: StreamerConfig) -> Self {
        let (input, _) = watch::channel(DriveInput::default());
        Self {
            manager,
            input,
            config,
        }
    }

    /// Replace the current joystick position
    pub fn set_input(&self, x: f64, y: f64) {
        self.input.send_replace(DriveInput { x, y });
    }

    pub fn input(&self) -> DriveInput {
        *self.input.borrow()
    }

    /// Send the current input now instead of waiting for the next tick
    pub fn send_now(&self) -> Result<()> {
        send_drive(&self.manager, self.input())
    }

    /// Spawn the streaming task
    pub fn start(&self) -> StreamerHandle {
        let manager = self.manager.clone();
        let input = self.input.subscribe();
        let config = self.config;

        let task = tokio::spawn(async move {
            let mut drive_ticker = interval(config.drive_interval);
            let mut health_ticker = interval(config.health_interval);
            drive_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            health_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = drive_ticker.tick() => {
                        if !manager.is_connected() {
                            continue;
                        }
                        let current = *input.borrow();
                        if let Err(e) = send_drive(&manager, current) {
                            debug!("Drive update skipped: {}", e);
                        }
                    }
                    _ = health_ticker.tick() => {
                        if !manager.is_connected() {
                            continue;
                        }
                        if let Err(e) = manager.request_health() {
                            debug!("Health request skipped: {}", e);
                        }
                    }
                }
            }
        });

        info!(
            "Drive streamer started (drive every {:?}, health every {:?})",
            config.drive_interval, config.health_interval
        );
        StreamerHandle { task: Some(task) }
    }
}

fn send_drive(manager: &ConnectionManager, input: DriveInput) -> Result<()> {
    let (left, right) = drivetrain::mix(input.x, input.y);
    manager.send_drive(left, right)
}

/// Stops the streaming task on [`stop`](Self::stop) or drop
pub struct StreamerHandle {
    task: Option<JoinHandle<()>>,
}

impl StreamerHandle {
    pub fn stop(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Drive streamer stopped");
        }
    }
}

impl Drop for StreamerHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
