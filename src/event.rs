//! Asynchronous notifications a component raises to its client.
//!
//! Events travel through [`Callbacks::on_event`](crate::component::Callbacks)
//! from whichever component thread discovered them: command completions
//! from the command thread, flags, marks and processing errors from the
//! buffer-management thread.

use crate::component::LifecycleState;
use crate::error::Error;
use crate::metadata::{BufferFlags, Mark};
use std::fmt;

/// Which command has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedCommand {
    /// A state transition reached the given state.
    StateSet(LifecycleState),
    /// A port was flushed.
    Flush(usize),
    /// A port was enabled (and populated, outside `Loaded`).
    PortEnable(usize),
    /// A port was disabled (and depopulated, outside `Loaded`).
    PortDisable(usize),
    /// A mark was queued on a port.
    MarkBuffer(usize),
}

/// Events raised by a component.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An asynchronous command finished successfully.
    CmdComplete(CompletedCommand),

    /// A command failed, or the worker hit a processing error.
    Error(Error),

    /// A flagged buffer (EOS) passed through a port.
    BufferFlag {
        /// Port the buffer left through.
        port: usize,
        /// Flags carried by the buffer.
        flags: BufferFlags,
    },

    /// A transform changed the output port's format.
    PortSettingsChanged {
        /// The affected output port.
        port: usize,
    },

    /// A marked buffer reached the component its mark targets.
    Mark(Mark),
}

impl Event {
    /// Whether this is the completion of `command`.
    pub fn is_complete(&self, command: CompletedCommand) -> bool {
        matches!(self, Event::CmdComplete(done) if *done == command)
    }

    /// Whether this is an error event.
    pub fn is_error(&self) -> bool {
        matches!(self, Event::Error(_))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::CmdComplete(done) => write!(f, "CmdComplete: {:?}", done),
            Event::Error(err) => write!(f, "Error: {}", err),
            Event::BufferFlag { port, flags } => write!(f, "BufferFlag: port {} {:?}", port, flags),
            Event::PortSettingsChanged { port } => write!(f, "PortSettingsChanged: port {}", port),
            Event::Mark(mark) => write!(f, "Mark: {} tag {}", mark.target, mark.tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_complete() {
        let event = Event::CmdComplete(CompletedCommand::StateSet(LifecycleState::Idle));
        assert!(event.is_complete(CompletedCommand::StateSet(LifecycleState::Idle)));
        assert!(!event.is_complete(CompletedCommand::StateSet(LifecycleState::Loaded)));
        assert!(!event.is_error());
    }

    #[test]
    fn test_event_display() {
        let event = Event::Error(Error::BadPortIndex(2));
        assert_eq!(event.to_string(), "Error: bad port index: 2");
        let event = Event::PortSettingsChanged { port: 1 };
        assert_eq!(event.to_string(), "PortSettingsChanged: port 1");
    }
}
