//! Tracing integration for structured logging and spans.
//!
//! Each component thread (command thread and buffer-management thread)
//! enters a span for its whole lifetime, so every event it logs carries
//! the component's name.

use tracing::{Level, Span, span};

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether component threads enter a span for their lifetime.
    pub component_spans: bool,
    /// Whether every buffer hand-off is logged at trace level.
    pub buffer_events: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            component_spans: true,
            buffer_events: false, // Can be expensive
        }
    }
}

impl TracingConfig {
    /// Spans and per-buffer events.
    pub fn all() -> Self {
        Self {
            component_spans: true,
            buffer_events: true,
        }
    }

    /// Disable all spans.
    pub fn none() -> Self {
        Self {
            component_spans: false,
            buffer_events: false,
        }
    }
}

/// Create a span for one of a component's threads.
///
/// # Example
///
/// ```rust,ignore
/// use portline::observability::span_component;
///
/// let span = span_component("camera", "worker");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_component(component: &str, role: &'static str) -> Span {
    span!(Level::DEBUG, "component", name = %component, role = role)
}

/// Enter a component span for the rest of the calling thread's scope,
/// or a disabled span when `config` turns spans off.
pub fn instrument_thread(
    config: &TracingConfig,
    component: &str,
    role: &'static str,
) -> tracing::span::EnteredSpan {
    if config.component_spans {
        span_component(component, role).entered()
    } else {
        Span::none().entered()
    }
}

/// Log a state transition.
#[inline]
pub fn trace_transition(component: &str, from: &str, to: &str) {
    tracing::info!(
        component = %component,
        from = %from,
        to = %to,
        "state changed"
    );
}

/// Log a buffer leaving a port.
#[inline]
pub fn trace_hand_off(component: &str, port: usize, filled: usize, tunneled: bool) {
    tracing::trace!(
        component = %component,
        port = port,
        filled = filled,
        tunneled = tunneled,
        "buffer handed off"
    );
}

/// Log a processing error reported from a worker thread.
#[inline]
pub fn trace_error(component: &str, error: &dyn std::error::Error) {
    tracing::warn!(
        component = %component,
        error = %error,
        "processing error"
    );
}

/// Log end-of-stream leaving a port.
#[inline]
pub fn trace_eos(component: &str, port: usize) {
    tracing::info!(component = %component, port = port, "end of stream");
}
