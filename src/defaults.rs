//! Default port, ring and command-queue sizes.
//!
//! Buffer sizes follow the frame shapes used by the reference components:
//! - Pattern capture: 320x240 YUYV = 153,600 bytes
//! - Generic ports: 64KB, enough for encoded frames and audio blocks
//!
//! # Usage
//!
//! ```rust,ignore
//! use portline::component::{PortDefinition, PortDomain};
//! use portline::defaults;
//!
//! let def = PortDefinition::output(0, PortDomain::Video)
//!     .with_buffers(defaults::PORT_BUFFER_COUNT, defaults::PATTERN_FRAME_SIZE);
//! ```

use std::time::Duration;

// =============================================================================
// Port Buffers
// =============================================================================

/// Default `buffer_count_actual` for a new port.
pub const PORT_BUFFER_COUNT: usize = 4;

/// Default `buffer_count_min` for a new port.
pub const PORT_BUFFER_COUNT_MIN: usize = 1;

/// Default buffer size for a new port (64KB).
pub const PORT_BUFFER_SIZE: usize = 64 * 1024;

// =============================================================================
// Capture
// =============================================================================

/// Default number of device slots in a capture ring.
/// Four slots keep two frames in flight while two are being delivered.
pub const CAPTURE_SLOT_COUNT: usize = 4;

/// Pattern frame width in pixels.
pub const PATTERN_WIDTH: usize = 320;

/// Pattern frame height in pixels.
pub const PATTERN_HEIGHT: usize = 240;

/// Pattern frame size (YUYV, 2 bytes per pixel).
pub const PATTERN_FRAME_SIZE: usize = PATTERN_WIDTH * PATTERN_HEIGHT * 2;

/// Pattern frame interval (~30fps).
pub const PATTERN_FRAME_INTERVAL: Duration = Duration::from_millis(33);

// =============================================================================
// Threads
// =============================================================================

/// Depth of a component's command channel.
pub const COMMAND_QUEUE_DEPTH: usize = 16;

/// How long the worker backs off after a device error before retrying.
pub const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Poll slice used while waiting for buffers to come home during
/// depopulation, so queued returns can be drained between waits.
pub const DEPOPULATE_POLL: Duration = Duration::from_millis(50);
