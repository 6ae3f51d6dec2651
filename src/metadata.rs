//! Buffer metadata types: identities, flags and latency marks.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    /// Allocate a fresh identity.
    pub(crate) fn next() -> Self {
        Self(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// Process-unique identity of a buffer header.
///
/// Ports remember the ids associated with them so that hand-off and free
/// calls can reject headers that belong elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
    pub(crate) fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Flags indicating buffer properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// The timestamp on this buffer is the stream's start time.
    pub start_time: bool,
    /// Buffer marks end of stream.
    pub eos: bool,
}

impl BufferFlags {
    /// Flags with only EOS set.
    pub fn eos() -> Self {
        Self {
            eos: true,
            ..Default::default()
        }
    }

    /// Set the end-of-stream flag.
    pub fn set_eos(&mut self, value: bool) {
        self.eos = value;
    }

    /// Check if end-of-stream is set.
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    /// Set the start-time flag.
    pub fn set_start_time(&mut self, value: bool) {
        self.start_time = value;
    }

    /// Check if the start-time flag is set.
    pub fn is_start_time(&self) -> bool {
        self.start_time
    }

    /// Whether no flag is set.
    pub fn is_empty(&self) -> bool {
        !self.start_time && !self.eos
    }
}

/// Latency probe attached to a buffer.
///
/// Every component that is not the target forwards the mark untouched to
/// the buffer it produces. The target clears it and raises
/// [`Event::Mark`](crate::event::Event::Mark) exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mark {
    /// Component that should report the mark.
    pub target: ComponentId,
    /// Opaque client tag echoed back in the event.
    pub tag: u64,
}

impl Mark {
    /// Create a mark aimed at `target`.
    pub fn new(target: ComponentId, tag: u64) -> Self {
        Self { target, tag }
    }

    /// Whether `component` is the mark's target.
    pub fn targets(&self, component: ComponentId) -> bool {
        self.target == component
    }
}
