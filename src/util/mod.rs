//! Small building blocks shared by the connection tasks

mod curve;
mod latch;
mod rolling_buffer;

pub use curve::inverse_curve;
pub use latch::WaitableLatch;
pub use rolling_buffer::RollingBuffer;
