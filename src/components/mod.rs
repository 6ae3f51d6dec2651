//! Reference components.
//!
//! Small, complete components used by the registry's built-ins, the
//! integration tests and the benchmarks:
//!
//! - [`PatternDevice`]: software capture driver with a fixed frame rate
//! - [`Passthrough`]: copying transform
//! - [`NullSink`]: counting sink

mod null;
mod passthrough;
mod pattern;

pub use null::NullSink;
pub use passthrough::Passthrough;
pub use pattern::{FRAME_HEADER_LEN, PatternConfig, PatternDevice, frame_number};
