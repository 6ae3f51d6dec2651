//! Capture components: asynchronous device I/O pipelined through a ring.
//!
//! A capture component owns a [`CaptureDriver`] and, between `Idle` and
//! `Loaded`, a [`RingCaptureQueue`] sized by the device. Its worker keeps
//! every free slot submitted, harvests completions in order and copies
//! ready slots into the buffers queued on its output ports.
//!
//! When consumers fall behind and the ring stays full with at least half
//! of it ready, the oldest slot is dropped. Live capture prefers losing a
//! frame to overrunning the device.

mod driver;
mod engine;
mod ring;

pub use driver::{CaptureDriver, CompletedSlot};
pub use engine::{CaptureEngine, CaptureStats};
pub use ring::{CaptureSlot, RingCaptureQueue};
