//! Operator-side drive control

pub mod drivetrain;
mod streamer;

pub use streamer::{DriveInput, DriveStreamer, StreamerConfig, StreamerHandle};
