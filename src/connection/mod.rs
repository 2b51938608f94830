//! Connection management for the rover link
//!
//! This module handles:
//! - The primary and drive sockets, opened together as one link
//! - Automatic reconnection with a fixed backoff
//! - A receive watchdog that drops silent links and samples link quality

mod manager;
mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::{ConnectionConfig, ConnectionManager};
