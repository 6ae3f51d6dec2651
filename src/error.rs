//! Error types for portline.

use crate::buffer::BufferHeader;
use crate::component::LifecycleState;
use thiserror::Error;

/// Result type alias using portline's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for portline operations.
///
/// Synchronous misuse (bad index, wrong state) is returned straight to the
/// caller and has no side effects. Failures discovered on a component's
/// worker thread travel to the client inside [`Event::Error`](crate::event::Event).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A structurally invalid argument.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Port index out of range, or the port has the wrong direction.
    #[error("bad port index: {0}")]
    BadPortIndex(usize),

    /// The command is valid, but not in the component's current state.
    #[error("operation `{operation}` not allowed in state {state:?}")]
    IncorrectStateOperation {
        /// What was attempted.
        operation: &'static str,
        /// State the component was in.
        state: LifecycleState,
    },

    /// Undefined lifecycle edge.
    #[error("invalid state transition {from:?} -> {to:?}")]
    IncorrectStateTransition {
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },

    /// The component is already in the requested state.
    #[error("component already in state {0:?}")]
    SameState(LifecycleState),

    /// Buffer allocation, thread spawn or population failed.
    #[error("insufficient resources: {0}")]
    InsufficientResources(String),

    /// Tunnel domain/format mismatch or a rejected negotiation.
    #[error("ports not compatible: {0}")]
    PortsNotCompatible(String),

    /// Capture device or sink I/O failure.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// A factory or config block declares an incompatible API version.
    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version the runtime speaks.
        expected: u32,
        /// Version that was presented.
        found: u32,
    },

    /// The index is known but the value cannot be applied.
    #[error("unsupported setting: {0}")]
    UnsupportedSetting(String),

    /// The parameter or config index is unknown to this component.
    #[error("unsupported index: {0}")]
    UnsupportedIndex(String),

    /// The component has entered the Invalid state and accepts nothing.
    #[error("component is in the Invalid state")]
    InvalidState,

    /// A bounded rendezvous wait elapsed.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl Error {
    /// Shorthand for [`Error::IncorrectStateOperation`].
    pub fn wrong_state(operation: &'static str, state: LifecycleState) -> Self {
        Self::IncorrectStateOperation { operation, state }
    }

    /// Whether the error came from a state check rather than bad input.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::IncorrectStateOperation { .. }
                | Self::IncorrectStateTransition { .. }
                | Self::SameState(_)
                | Self::InvalidState
        )
    }
}

/// A buffer hand-in that was refused.
///
/// The header travels back with the error so ownership is never lost.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct Rejected {
    /// Why the buffer was refused.
    pub error: Error,
    /// The refused header, returned to the caller.
    pub header: BufferHeader,
}

impl From<Rejected> for Error {
    fn from(rejected: Rejected) -> Self {
        rejected.error
    }
}
