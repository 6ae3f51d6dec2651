//! Component lifecycle states and the legal transitions between them.

use crate::error::{Error, Result};
use std::fmt;

/// Lifecycle state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// Fatal state; the component accepts no further work.
    Invalid,
    /// Constructed, no buffers associated.
    #[default]
    Loaded,
    /// Waiting for an external resource grant.
    WaitForResources,
    /// Buffers populated, worker parked.
    Idle,
    /// Worker processing buffers.
    Executing,
    /// Worker parked, buffers retained.
    Pause,
}

impl LifecycleState {
    /// States in which the buffer-management thread exists.
    pub fn has_worker(&self) -> bool {
        matches!(self, Self::Idle | Self::Executing | Self::Pause)
    }

    /// States in which buffers may be handed to the component.
    pub fn accepts_buffers(&self) -> bool {
        self.has_worker()
    }

    /// States in which structural parameters may be changed.
    pub fn is_configurable(&self) -> bool {
        matches!(self, Self::Loaded | Self::WaitForResources)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Kind of work a transition entails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionKind {
    /// Loaded/WaitForResources -> Idle: populate every enabled port.
    Populate,
    /// Idle -> Loaded: flush and depopulate every enabled port.
    Depopulate,
    /// Executing/Pause -> Idle: flush every port, then park the worker.
    Stop,
    /// Idle -> Executing/Pause: wake the worker.
    Start,
    /// Pause <-> Executing: flip the parking condition only.
    Toggle,
    /// Loaded <-> WaitForResources: bookkeeping only.
    Resources,
    /// Anything -> Invalid.
    Invalidate,
}

/// Classify `from -> to`, rejecting same-state and undefined edges.
pub(crate) fn classify(from: LifecycleState, to: LifecycleState) -> Result<TransitionKind> {
    use LifecycleState::*;

    if from == to {
        return Err(Error::SameState(from));
    }
    let kind = match (from, to) {
        (_, Invalid) => TransitionKind::Invalidate,
        (Loaded | WaitForResources, Idle) => TransitionKind::Populate,
        (Loaded, WaitForResources) | (WaitForResources, Loaded) => TransitionKind::Resources,
        (Idle, Loaded) => TransitionKind::Depopulate,
        (Idle, Executing | Pause) => TransitionKind::Start,
        (Executing | Pause, Idle) => TransitionKind::Stop,
        (Executing, Pause) | (Pause, Executing) => TransitionKind::Toggle,
        _ => return Err(Error::IncorrectStateTransition { from, to }),
    };
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::*;
    use super::*;

    #[test]
    fn test_legal_edges() {
        assert_eq!(classify(Loaded, Idle).unwrap(), TransitionKind::Populate);
        assert_eq!(
            classify(WaitForResources, Idle).unwrap(),
            TransitionKind::Populate
        );
        assert_eq!(classify(Idle, Loaded).unwrap(), TransitionKind::Depopulate);
        assert_eq!(classify(Idle, Executing).unwrap(), TransitionKind::Start);
        assert_eq!(classify(Idle, Pause).unwrap(), TransitionKind::Start);
        assert_eq!(classify(Executing, Idle).unwrap(), TransitionKind::Stop);
        assert_eq!(classify(Pause, Idle).unwrap(), TransitionKind::Stop);
        assert_eq!(classify(Pause, Executing).unwrap(), TransitionKind::Toggle);
        assert_eq!(classify(Executing, Pause).unwrap(), TransitionKind::Toggle);
        assert_eq!(
            classify(Loaded, WaitForResources).unwrap(),
            TransitionKind::Resources
        );
    }

    #[test]
    fn test_anything_to_invalid() {
        for from in [Loaded, WaitForResources, Idle, Executing, Pause] {
            assert_eq!(classify(from, Invalid).unwrap(), TransitionKind::Invalidate);
        }
    }

    #[test]
    fn test_same_state_rejected() {
        assert_eq!(classify(Idle, Idle).unwrap_err(), Error::SameState(Idle));
        assert_eq!(
            classify(Invalid, Invalid).unwrap_err(),
            Error::SameState(Invalid)
        );
    }

    #[test]
    fn test_undefined_edges_rejected() {
        for (from, to) in [
            (Loaded, Executing),
            (Loaded, Pause),
            (Executing, Loaded),
            (Pause, Loaded),
            (Invalid, Loaded),
            (WaitForResources, Executing),
        ] {
            assert_eq!(
                classify(from, to).unwrap_err(),
                Error::IncorrectStateTransition { from, to }
            );
        }
    }

    #[test]
    fn test_state_predicates() {
        assert!(Idle.has_worker());
        assert!(!Loaded.has_worker());
        assert!(Loaded.is_configurable());
        assert!(!Executing.is_configurable());
    }
}
