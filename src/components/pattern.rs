//! Synthetic capture device.
//!
//! `PatternDevice` behaves like a streaming camera with a fixed frame
//! rate: slots must be submitted before they can complete, completion
//! blocks until the next frame is due, and frames come back in submission
//! order. Each frame carries its sequence number so tests can check
//! ordering and drops downstream.
//!
//! ## Frame layout
//!
//! ```text
//!   bytes 0..8   frame number, little-endian u64
//!   bytes 8..    (frame number % 256) repeated
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use portline::components::{PatternConfig, PatternDevice};
//!
//! let config = PatternConfig::default().with_frame_interval(Duration::from_millis(5));
//! let camera = Component::new(
//!     PatternDevice::default_config("camera"),
//!     Variant::capture(PatternDevice::new(config)),
//! )?;
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::capture::{CaptureDriver, CaptureSlot, CompletedSlot};
use crate::component::{ComponentConfig, ConfigValue, PortDefinition, PortDomain, Tunable, Variant};
use crate::defaults::{CAPTURE_SLOT_COUNT, PATTERN_FRAME_INTERVAL, PATTERN_FRAME_SIZE};
use crate::error::{Error, Result};
use crate::registry::{API_VERSION, ComponentFactory};

/// Size of the frame-number header at the start of every frame.
pub const FRAME_HEADER_LEN: usize = 8;

/// Pattern device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternConfig {
    /// Number of device slots (ring size).
    pub slot_count: usize,
    /// Bytes per frame.
    pub frame_size: usize,
    /// Time between frames.
    pub frame_interval: Duration,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            slot_count: CAPTURE_SLOT_COUNT,
            frame_size: PATTERN_FRAME_SIZE,
            frame_interval: PATTERN_FRAME_INTERVAL,
        }
    }
}

impl PatternConfig {
    /// Set the number of slots.
    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    /// Set the frame size.
    pub fn with_frame_size(mut self, frame_size: usize) -> Self {
        self.frame_size = frame_size;
        self
    }

    /// Set the frame interval.
    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }
}

/// Capture time of frame `frame`, saturating instead of overflowing.
fn frame_timestamp(interval: Duration, frame: u64) -> Duration {
    let nanos = interval.as_nanos().saturating_mul(u128::from(frame));
    let secs = nanos / 1_000_000_000;
    match u64::try_from(secs) {
        Ok(secs) => Duration::new(secs, (nanos % 1_000_000_000) as u32),
        Err(_) => Duration::MAX,
    }
}

/// Read the frame number back out of a captured payload.
pub fn frame_number(payload: &[u8]) -> Option<u64> {
    let header: [u8; FRAME_HEADER_LEN] = payload.get(..FRAME_HEADER_LEN)?.try_into().ok()?;
    Some(u64::from_le_bytes(header))
}

/// A capture device producing numbered test frames at a fixed rate.
///
/// Config keys:
/// - `frames` (read-only): frames produced since open
/// - `frame_interval`: time between frames
/// - `inject_fault` (write-only): make the next completion fail
#[derive(Debug)]
pub struct PatternDevice {
    config: PatternConfig,
    opened: bool,
    streaming: bool,
    slots: Vec<Vec<u8>>,
    submitted: VecDeque<usize>,
    frame: u64,
    next_due: Option<Instant>,
    fault: bool,
}

impl Default for PatternDevice {
    fn default() -> Self {
        Self::new(PatternConfig::default())
    }
}

impl PatternDevice {
    /// Create a device with `config`.
    pub fn new(config: PatternConfig) -> Self {
        Self {
            config,
            opened: false,
            streaming: false,
            slots: Vec::new(),
            submitted: VecDeque::new(),
            frame: 0,
            next_due: None,
            fault: false,
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// One video output (port 0) sized for the default frame.
    pub fn default_config(name: &str) -> ComponentConfig {
        ComponentConfig::new(name).with_port(
            PortDefinition::output(0, PortDomain::Video)
                .with_encoding("yuyv")
                .with_buffers(CAPTURE_SLOT_COUNT, PATTERN_FRAME_SIZE),
        )
    }

    /// Registry entry. Frames are sized to the first output port.
    pub fn factory() -> ComponentFactory {
        ComponentFactory::new(
            "pattern",
            "synthetic capture device producing numbered frames",
            API_VERSION,
            Self::default_config,
            |config| {
                let mut pattern = PatternConfig::default();
                if let Some(port) = config.ports.iter().find(|p| p.is_output()) {
                    pattern = pattern.with_frame_size(port.buffer_size);
                }
                Ok(Variant::capture(PatternDevice::new(pattern)))
            },
        )
    }

    fn render(&mut self, index: usize) -> usize {
        let frame = self.frame;
        let slot = &mut self.slots[index];
        let fill = (frame % 256) as u8;
        let header_len = FRAME_HEADER_LEN.min(slot.len());
        slot[..header_len].copy_from_slice(&frame.to_le_bytes()[..header_len]);
        slot[header_len..].fill(fill);
        slot.len()
    }

    fn wait_for_frame(&mut self) {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // A consumer that fell behind does not earn a burst of catch-up frames.
        let next = due + self.config.frame_interval;
        self.next_due = Some(next.max(Instant::now()));
    }
}

impl Tunable for PatternDevice {
    fn get_config(&self, key: &str) -> Result<ConfigValue> {
        match key {
            "frames" => Ok(ConfigValue::Uint(self.frame)),
            "frame_interval" => Ok(ConfigValue::Duration(self.config.frame_interval)),
            _ => Err(Error::UnsupportedIndex(key.to_string())),
        }
    }

    fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        match key {
            "frame_interval" => {
                let interval = value
                    .as_duration()
                    .ok_or_else(|| Error::UnsupportedSetting(format!("frame_interval = {value}")))?;
                self.config.frame_interval = interval;
                Ok(())
            }
            "inject_fault" => {
                self.fault = value
                    .as_bool()
                    .ok_or_else(|| Error::UnsupportedSetting(format!("inject_fault = {value}")))?;
                Ok(())
            }
            _ => Err(Error::UnsupportedIndex(key.to_string())),
        }
    }
}

impl CaptureDriver for PatternDevice {
    fn open(&mut self) -> Result<()> {
        if self.opened {
            return Err(Error::Hardware("pattern device already open".into()));
        }
        self.opened = true;
        self.frame = 0;
        tracing::debug!(
            slots = self.config.slot_count,
            frame_size = self.config.frame_size,
            "pattern device opened"
        );
        Ok(())
    }

    fn configure(&mut self) -> Result<Vec<CaptureSlot>> {
        if !self.opened {
            return Err(Error::Hardware("pattern device not open".into()));
        }
        if self.config.frame_size == 0 {
            return Err(Error::UnsupportedSetting("frame_size = 0".into()));
        }
        let size = self.config.frame_size;
        self.slots = vec![vec![0; size]; self.config.slot_count];
        Ok((0..self.config.slot_count)
            .map(|i| CaptureSlot::new(i * size, size))
            .collect())
    }

    fn start(&mut self) -> Result<()> {
        if self.slots.is_empty() {
            return Err(Error::Hardware("pattern device not configured".into()));
        }
        self.streaming = true;
        self.next_due = Some(Instant::now() + self.config.frame_interval);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.streaming = false;
        self.submitted.clear();
        self.next_due = None;
        Ok(())
    }

    fn submit_slot(&mut self, index: usize) -> Result<()> {
        if !self.streaming {
            return Err(Error::Hardware("submit while not streaming".into()));
        }
        if index >= self.slots.len() {
            return Err(Error::Hardware(format!("no slot {index}")));
        }
        self.submitted.push_back(index);
        Ok(())
    }

    fn complete_slot(&mut self) -> Result<CompletedSlot> {
        if self.fault {
            self.fault = false;
            return Err(Error::Hardware("injected capture fault".into()));
        }
        if !self.streaming {
            return Err(Error::Hardware("complete while not streaming".into()));
        }
        let Some(index) = self.submitted.pop_front() else {
            return Err(Error::Hardware("no slot submitted".into()));
        };
        self.wait_for_frame();
        let len = self.render(index);
        self.frame += 1;
        Ok(CompletedSlot {
            index,
            len,
            timestamp: frame_timestamp(self.config.frame_interval, self.frame),
        })
    }

    fn slot_data(&self, index: usize) -> &[u8] {
        self.slots.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    fn close(&mut self) {
        self.streaming = false;
        self.opened = false;
        self.slots.clear();
        self.submitted.clear();
        self.next_due = None;
    }
}
