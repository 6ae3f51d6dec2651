//! The capture-device surface a capture component is driven through.

use super::ring::CaptureSlot;
use crate::component::Tunable;
use crate::error::Result;
use std::time::Duration;

/// A slot the device reports as finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedSlot {
    /// Ring index of the slot.
    pub index: usize,
    /// Valid bytes captured.
    pub len: usize,
    /// Capture timestamp.
    pub timestamp: Duration,
}

/// Asynchronous capture hardware.
///
/// Slots are submitted in ring order and must complete in the same
/// order. Every method runs on the owning component's threads; the
/// driver never sees concurrent calls.
pub trait CaptureDriver: Tunable {
    /// Acquire the device.
    fn open(&mut self) -> Result<()>;

    /// Apply the current format and map the device's slots.
    ///
    /// The returned list fixes the ring size.
    fn configure(&mut self) -> Result<Vec<CaptureSlot>>;

    /// Start streaming.
    fn start(&mut self) -> Result<()>;

    /// Stop streaming; every submitted slot is abandoned.
    fn stop(&mut self) -> Result<()>;

    /// Queue slot `index` for capture.
    fn submit_slot(&mut self, index: usize) -> Result<()>;

    /// Block until the oldest submitted slot completes.
    fn complete_slot(&mut self) -> Result<CompletedSlot>;

    /// Payload of slot `index` as last captured.
    fn slot_data(&self, index: usize) -> &[u8];

    /// Release the device.
    fn close(&mut self);
}
