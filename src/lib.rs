//! # Portline
//!
//! An embedded multimedia component runtime.
//!
//! Independent processing units (capture sources, transforms, sinks) each
//! own a set of ports and a pair of threads. They are wired output-to-input
//! through tunnels and driven by a shared lifecycle state machine.
//!
//! ## Features
//!
//! - **Lifecycle state machine**: `Loaded`, `Idle`, `Executing`, `Pause`,
//!   `WaitForResources`, `Invalid`, with buffer population gating `Idle`
//! - **Tunnel negotiation**: a two-phase handshake decides which end owns
//!   the shared buffers, with rollback on rejection
//! - **Flush protocol**: every held buffer comes back to its owner
//!   before a flush completes
//! - **Capture ring**: triple-cursor ring pipelining asynchronous device I/O
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portline::prelude::*;
//!
//! let registry = Registry::with_builtins();
//! let camera = registry.instantiate("pattern", "camera")?;
//! let display = registry.instantiate("null_sink", "display")?;
//! setup_tunnel(&camera, 0, &display, 0, TunnelSetup::default())?;
//!
//! for comp in [&camera, &display] {
//!     comp.send_command(Command::StateSet(LifecycleState::Idle))?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod capture;
pub mod component;
pub mod components;
pub mod defaults;
pub mod error;
pub mod event;
pub mod metadata;
pub mod observability;
pub mod registry;
pub mod sync;
pub mod tunnel;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::BufferHeader;
    pub use crate::component::{
        CallbackReceivers, Callbacks, ChannelCallbacks, Command, Component, ComponentConfig,
        ConfigValue, LifecycleState, Parameter, PortDefinition, PortDomain, Present, Transform,
        TransformOutcome, Variant,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::{CompletedCommand, Event};
    pub use crate::metadata::{BufferFlags, ComponentId, Mark};
    pub use crate::registry::Registry;
    pub use crate::tunnel::{BufferSupplier, TunnelSetup, setup_tunnel, teardown_tunnel};
}

pub use error::{Error, Result};
