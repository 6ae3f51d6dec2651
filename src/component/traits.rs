//! Capability traits a component variant is built from.
//!
//! A component is one of a closed set of variants, chosen at construction:
//!
//! | Variant   | Capability       | Ports                   |
//! |-----------|------------------|-------------------------|
//! | `Filter`  | [`Transform`]    | >= 1 input, >= 1 output |
//! | `Sink`    | [`Present`]      | >= 1 input              |
//! | `Capture` | [`CaptureDriver`]| >= 1 output             |
//!
//! The runtime owns the ports, threads and protocols; a variant only does
//! the opaque "process one unit" work and reacts to state changes.
//!
//! [`CaptureDriver`]: crate::capture::CaptureDriver

use super::params::ConfigValue;
use super::state::LifecycleState;
use crate::buffer::BufferHeader;
use crate::capture::CaptureEngine;
use crate::error::{Error, Result};

// ============================================================================
// Capabilities
// ============================================================================

/// Hook run on the command thread while a transition is in progress.
pub trait Lifecycle: Send {
    /// Called once per transition, after the runtime's own work for
    /// `from -> to` is prepared and before the new state is observable.
    ///
    /// An error on `Loaded -> Idle` aborts the transition.
    fn on_transition(&mut self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let _ = (from, to);
        Ok(())
    }
}

/// Variant-specific config keys.
pub trait Tunable: Send {
    /// Read a config value.
    fn get_config(&self, key: &str) -> Result<ConfigValue> {
        Err(Error::UnsupportedIndex(key.to_string()))
    }

    /// Write a config value.
    fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        let _ = value;
        Err(Error::UnsupportedIndex(key.to_string()))
    }
}

/// What a transform did with its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Output is ready to go downstream; input is done.
    Produced,
    /// Input is done, output is kept for the next input.
    Consumed,
    /// Output format changed; the output goes downstream as it is and the
    /// client is told through `PortSettingsChanged`.
    SettingsChanged,
}

/// Opaque one-input, one-output processing step.
pub trait Transform: Lifecycle + Tunable {
    /// Process `input` into `output`.
    ///
    /// Timestamp, EOS and marks are carried by the runtime; an
    /// implementation only touches the payload.
    fn transform(&mut self, input: &BufferHeader, output: &mut BufferHeader)
    -> Result<TransformOutcome>;
}

/// Display or audio sink surface.
pub trait Present: Lifecycle + Tunable {
    /// Render one buffer.
    fn present(&mut self, buffer: &BufferHeader) -> Result<()>;
}

// ============================================================================
// Variant
// ============================================================================

/// The closed set of component variants.
pub enum Variant {
    /// Transforms input buffers into output buffers.
    Filter(Box<dyn Transform>),
    /// Consumes input buffers.
    Sink(Box<dyn Present>),
    /// Produces output buffers from a capture device.
    Capture(CaptureEngine),
}

/// Discriminant of [`Variant`], for dispatching without the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    /// [`Variant::Filter`].
    Filter,
    /// [`Variant::Sink`].
    Sink,
    /// [`Variant::Capture`].
    Capture,
}

impl Variant {
    /// Wrap a transform.
    pub fn filter(transform: impl Transform + 'static) -> Self {
        Self::Filter(Box::new(transform))
    }

    /// Wrap a sink.
    pub fn sink(sink: impl Present + 'static) -> Self {
        Self::Sink(Box::new(sink))
    }

    /// Wrap a capture driver.
    pub fn capture(driver: impl crate::capture::CaptureDriver + 'static) -> Self {
        Self::Capture(CaptureEngine::new(Box::new(driver)))
    }

    /// Which variant this is.
    pub fn kind(&self) -> VariantKind {
        match self {
            Self::Filter(_) => VariantKind::Filter,
            Self::Sink(_) => VariantKind::Sink,
            Self::Capture(_) => VariantKind::Capture,
        }
    }

    pub(crate) fn on_transition(&mut self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        match self {
            Self::Filter(t) => t.on_transition(from, to),
            Self::Sink(s) => s.on_transition(from, to),
            Self::Capture(c) => c.on_transition(from, to),
        }
    }

    pub(crate) fn get_config(&self, key: &str) -> Result<ConfigValue> {
        match self {
            Self::Filter(t) => t.get_config(key),
            Self::Sink(s) => s.get_config(key),
            Self::Capture(c) => c.get_config(key),
        }
    }

    pub(crate) fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        match self {
            Self::Filter(t) => t.set_config(key, value),
            Self::Sink(s) => s.set_config(key, value),
            Self::Capture(c) => c.set_config(key, value),
        }
    }
}

impl std::fmt::Debug for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Variant").field(&self.kind()).finish()
    }
}
