//! Components: ports, a lifecycle state machine and two threads.
//!
//! ```text
//!   client ──send_command──► [command thread] ── transitions, flush, enable/disable
//!                                 │ spawns/joins
//!                                 ▼
//!   client ──empty/fill────► [ports] ◄──► [worker thread] ── transform/present/capture
//!                                 ▲              │
//!   tunnel peer ─────────────────┘              └──► hand-off: tunnel peer or callbacks
//! ```
//!
//! Every component owns:
//! - one command thread, for its whole life, executing [`Command`]s one at
//!   a time (exactly one transition in flight);
//! - one buffer-management thread, alive from `Loaded -> Idle` until the
//!   component returns to `Loaded`.
//!
//! Cross-component coordination is message-style: a component only ever
//! touches a peer through the peer's port queues and its tunnel calls.

mod callbacks;
mod command;
mod config;
mod params;
mod port;
mod state;
mod traits;
mod worker;

pub use callbacks::{CallbackReceivers, Callbacks, ChannelCallbacks};
pub use command::Command;
pub use config::ComponentConfig;
pub use params::{ConfigValue, ParamIndex, Parameter};
pub(crate) use port::Port;
pub use port::{PortDefinition, PortDirection, PortDomain};
pub use state::LifecycleState;
pub use traits::{
    Lifecycle, Present, Transform, TransformOutcome, Tunable, Variant, VariantKind,
};

use crate::buffer::BufferHeader;
use crate::error::{Error, Rejected, Result};
use crate::event::Event;
use crate::metadata::{BufferId, ComponentId};
use crate::observability;
use crate::sync::Doorbell;
use crate::tunnel::TunnelLink;
use command::Request;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the command thread and the worker.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    pub state: LifecycleState,
    /// Worker must leave its loop.
    pub exit: bool,
    /// Worker is not processing and will not until the state changes.
    pub parked: bool,
}

pub(crate) struct Inner {
    pub id: ComponentId,
    pub name: String,
    pub config: ComponentConfig,
    pub kind: VariantKind,
    pub ports: Vec<Port>,
    pub first_input: Option<usize>,
    pub first_output: Option<usize>,
    pub run: Mutex<RunState>,
    pub run_changed: Condvar,
    pub doorbell: Doorbell,
    pub variant: Mutex<Variant>,
    callbacks: RwLock<Option<Arc<dyn Callbacks>>>,
    commands: kanal::Sender<Request>,
    /// Commands queued or running on the command thread.
    pub pending: AtomicUsize,
    command_thread: Mutex<Option<JoinHandle<()>>>,
    pub worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a component. Cheap to clone.
#[derive(Clone)]
pub struct Component {
    inner: Arc<Inner>,
}

/// Non-owning handle, as held by tunnel peers.
#[derive(Clone, Default)]
pub struct WeakComponent(Weak<Inner>);

impl WeakComponent {
    /// The component, if still alive.
    pub fn upgrade(&self) -> Option<Component> {
        self.0.upgrade().map(|inner| Component { inner })
    }
}

// ============================================================================
// Construction and accessors
// ============================================================================

impl Component {
    /// Build a component in `Loaded` and start its command thread.
    pub fn new(config: ComponentConfig, mut variant: Variant) -> Result<Self> {
        config.validate()?;
        let first_input = config.first_port(PortDirection::Input);
        let first_output = config.first_port(PortDirection::Output);
        let kind = variant.kind();
        let layout_ok = match kind {
            VariantKind::Filter => first_input.is_some() && first_output.is_some(),
            VariantKind::Sink => first_input.is_some(),
            VariantKind::Capture => first_output.is_some() && first_input.is_none(),
        };
        if !layout_ok {
            return Err(Error::BadParameter(format!(
                "port layout of `{}` does not fit a {:?} component",
                config.name, kind
            )));
        }
        if let Variant::Capture(engine) = &mut variant {
            engine.attach_consumers(
                config
                    .ports
                    .iter()
                    .filter(|p| p.is_output())
                    .map(|p| p.index),
            );
        }

        let (tx, rx) = kanal::bounded(config.command_queue_depth);
        let inner = Arc::new(Inner {
            id: ComponentId::next(),
            name: config.name.clone(),
            kind,
            ports: config.ports.iter().cloned().map(Port::new).collect(),
            first_input,
            first_output,
            run: Mutex::new(RunState::default()),
            run_changed: Condvar::new(),
            doorbell: Doorbell::new(),
            variant: Mutex::new(variant),
            callbacks: RwLock::new(None),
            commands: tx,
            pending: AtomicUsize::new(0),
            command_thread: Mutex::new(None),
            worker: Mutex::new(None),
            config,
        });

        let weak = Arc::downgrade(&inner);
        let span_config = inner.config.tracing.clone();
        let name = inner.name.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-cmd", inner.name))
            .spawn(move || {
                let _span = observability::instrument_thread(&span_config, &name, "command");
                command::run(weak, rx);
            })
            .map_err(|e| Error::InsufficientResources(format!("command thread: {}", e)))?;
        *inner.command_thread.lock().unwrap() = Some(handle);

        tracing::info!(
            component = %inner.name,
            id = %inner.id,
            kind = ?kind,
            ports = inner.ports.len(),
            "component created"
        );
        Ok(Self { inner })
    }

    /// Process-unique identity.
    pub fn id(&self) -> ComponentId {
        self.inner.id
    }

    /// Configured name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Which variant this component is.
    pub fn kind(&self) -> VariantKind {
        self.inner.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    /// Number of ports.
    pub fn port_count(&self) -> usize {
        self.inner.ports.len()
    }

    /// Whether the buffer-management thread is running.
    pub fn has_worker(&self) -> bool {
        self.inner.worker.lock().unwrap().is_some()
    }

    /// Install the client callbacks.
    pub fn set_callbacks(&self, callbacks: Arc<dyn Callbacks>) {
        *self.inner.callbacks.write().unwrap() = Some(callbacks);
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakComponent {
        WeakComponent(Arc::downgrade(&self.inner))
    }

    pub(crate) fn port(&self, index: usize) -> Result<&Port> {
        self.inner.port(index)
    }

    /// Current definition of port `index`.
    pub fn port_definition(&self, index: usize) -> Result<PortDefinition> {
        Ok(self.port(index)?.definition())
    }

    /// Buffers waiting in port `index`'s queue.
    pub fn queued(&self, index: usize) -> Result<usize> {
        Ok(self.port(index)?.queued())
    }

    /// The tunnel on port `index`, if any.
    pub fn tunnel(&self, index: usize) -> Result<Option<TunnelLink>> {
        Ok(self.port(index)?.tunnel())
    }

    /// Stop the command thread.
    ///
    /// Only allowed in `Loaded`, `WaitForResources` or `Invalid`, with no
    /// command queued or running and no buffer-management thread alive. A
    /// Loaded -> Idle transition still waiting for its buffers counts as
    /// running: the command thread could not pick up the shutdown request
    /// until the client supplies them.
    pub fn shutdown(&self) -> Result<()> {
        let state = self.state();
        if state.has_worker()
            || self.inner.pending.load(Ordering::Acquire) > 0
            || self.has_worker()
        {
            return Err(Error::wrong_state("shutdown", state));
        }
        // A full or closed channel both mean nobody will run more commands.
        let _ = self.inner.commands.try_send(Request::Shutdown);
        let handle = self.inner.command_thread.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!(component = %self.name(), "command thread panicked");
            }
        }
        tracing::debug!(component = %self.name(), "component shut down");
        Ok(())
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Parameters, config and commands
// ============================================================================

impl Component {
    /// Read a parameter.
    pub fn get_parameter(&self, index: ParamIndex) -> Result<Parameter> {
        match index {
            ParamIndex::PortDefinition(port) => {
                Ok(Parameter::PortDefinition(self.port_definition(port)?))
            }
            ParamIndex::BufferSupplier(port) => Ok(Parameter::BufferSupplier {
                port,
                supplier: self.port(port)?.supplier_preference(),
            }),
        }
    }

    /// Write a parameter.
    ///
    /// Rejected with `IncorrectStateOperation` outside `Loaded` /
    /// `WaitForResources` unless the port is disabled.
    pub fn set_parameter(&self, param: Parameter) -> Result<()> {
        let state = self.inner.live_state()?;
        let port = self.port(param.port())?;
        if !state.is_configurable() && port.is_enabled() {
            return Err(Error::wrong_state("set_parameter", state));
        }
        match param {
            Parameter::PortDefinition(def) => port.set_definition(&def),
            Parameter::BufferSupplier { supplier, .. } => {
                port.set_supplier_preference(supplier);
                Ok(())
            }
        }
    }

    /// Read a variant config value.
    pub fn get_config(&self, key: &str) -> Result<ConfigValue> {
        self.inner.live_state()?;
        self.inner.variant.lock().unwrap().get_config(key)
    }

    /// Write a variant config value.
    pub fn set_config(&self, key: &str, value: ConfigValue) -> Result<()> {
        self.inner.live_state()?;
        self.inner.variant.lock().unwrap().set_config(key, value)
    }

    /// Queue a command for the command thread.
    ///
    /// Only malformed commands fail here; everything else completes or
    /// fails later through [`Event::CmdComplete`] / [`Event::Error`].
    pub fn send_command(&self, command: Command) -> Result<()> {
        self.inner.live_state()?;
        if let Some(port) = command.port() {
            self.port(port)?;
        }
        tracing::debug!(component = %self.name(), command = ?command, "command queued");
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        self.inner
            .commands
            .send(Request::Command(command))
            .map_err(|_| {
                self.inner.pending.fetch_sub(1, Ordering::AcqRel);
                Error::InsufficientResources("command thread has stopped".into())
            })
    }
}

// ============================================================================
// Buffer entry points
// ============================================================================

impl Component {
    /// Hand a filled input buffer to the component.
    pub fn empty_this_buffer(&self, header: BufferHeader) -> std::result::Result<(), Rejected> {
        self.hand_in(header, PortDirection::Input, "empty_this_buffer")
    }

    /// Hand an empty output buffer to the component for filling.
    pub fn fill_this_buffer(&self, mut header: BufferHeader) -> std::result::Result<(), Rejected> {
        header.reset();
        self.hand_in(header, PortDirection::Output, "fill_this_buffer")
    }

    fn hand_in(
        &self,
        header: BufferHeader,
        direction: PortDirection,
        operation: &'static str,
    ) -> std::result::Result<(), Rejected> {
        match self.check_hand_in(&header, direction, operation) {
            Ok(port) => {
                port.enqueue(header);
                self.inner.doorbell.ring();
                Ok(())
            }
            Err(error) => Err(Rejected { error, header }),
        }
    }

    fn check_hand_in(
        &self,
        header: &BufferHeader,
        direction: PortDirection,
        operation: &'static str,
    ) -> Result<&Port> {
        let state = self.inner.live_state()?;
        let recorded = match direction {
            PortDirection::Input => header.input_port(),
            PortDirection::Output => header.output_port(),
        };
        // A header bound only to the other direction has no index for this call.
        let index = recorded.ok_or_else(|| {
            Error::BadPortIndex(header.input_port().or(header.output_port()).unwrap_or(usize::MAX))
        })?;
        let port = self.port(index)?;
        if port.direction() != direction {
            return Err(Error::BadPortIndex(index));
        }
        if port.tunnel().is_some() {
            return Err(Error::BadParameter(format!("port {} is tunneled", index)));
        }
        if !port.is_associated(header.id()) {
            return Err(Error::BadParameter(format!(
                "buffer {} does not belong to port {}",
                header.id().as_u64(),
                index
            )));
        }
        if !state.accepts_buffers() || !port.is_enabled() {
            return Err(Error::wrong_state(operation, state));
        }
        Ok(port)
    }

    /// Associate client memory with port `index`.
    ///
    /// The memory must be at least the port's `buffer_size`. It comes back
    /// from [`free_buffer`](Self::free_buffer).
    pub fn use_buffer(&self, index: usize, app_private: u64, memory: Vec<u8>) -> Result<BufferHeader> {
        let port = self.check_population_entry(index, memory.len(), "use_buffer")?;
        let header = BufferHeader::wrap(memory, self.id(), app_private)?;
        self.bind(port, header)
    }

    /// Allocate a buffer of `size` bytes on port `index`.
    pub fn allocate_buffer(&self, index: usize, app_private: u64, size: usize) -> Result<BufferHeader> {
        let port = self.check_population_entry(index, size, "allocate_buffer")?;
        let header = BufferHeader::allocate(size, self.id(), app_private)?;
        self.bind(port, header)
    }

    fn check_population_entry(&self, index: usize, size: usize, operation: &'static str) -> Result<&Port> {
        let state = self.inner.live_state()?;
        let port = self.port(index)?;
        if port.tunnel().is_some() {
            return Err(Error::BadParameter(format!(
                "port {} is tunneled; its buffers come from the supplier",
                index
            )));
        }
        if !state.is_configurable() && port.is_populated() {
            return Err(Error::wrong_state(operation, state));
        }
        let required = port.definition().buffer_size;
        if size < required {
            return Err(Error::BadParameter(format!(
                "port {} needs {} byte buffers, got {}",
                index, required, size
            )));
        }
        Ok(port)
    }

    fn bind(&self, port: &Port, mut header: BufferHeader) -> Result<BufferHeader> {
        match port.direction() {
            PortDirection::Input => header.set_input_port(Some(port.index())),
            PortDirection::Output => header.set_output_port(Some(port.index())),
        }
        port.associate(header.id())?;
        tracing::trace!(
            component = %self.name(),
            port = port.index(),
            buffer = header.id().as_u64(),
            assigned = port.assigned_count(),
            "buffer associated"
        );
        Ok(header)
    }

    /// Dissociate and destroy a buffer, returning client memory if the
    /// buffer came from [`use_buffer`](Self::use_buffer).
    pub fn free_buffer(
        &self,
        index: usize,
        header: BufferHeader,
    ) -> std::result::Result<Option<Vec<u8>>, Rejected> {
        let checked = self.port(index).and_then(|port| {
            if header.supplier() != self.id() {
                return Err(Error::BadParameter(format!(
                    "buffer {} was not supplied by {}",
                    header.id().as_u64(),
                    self.name()
                )));
            }
            port.dissociate(header.id())
        });
        match checked {
            Ok(()) => Ok(header.release()),
            Err(error) => Err(Rejected { error, header }),
        }
    }
}

// ============================================================================
// Internals shared by both threads and by tunnel peers
// ============================================================================

impl Inner {
    pub fn state(&self) -> LifecycleState {
        self.run.lock().unwrap().state
    }

    /// Current state, or `InvalidState` once invalidated.
    pub fn live_state(&self) -> Result<LifecycleState> {
        match self.state() {
            LifecycleState::Invalid => Err(Error::InvalidState),
            state => Ok(state),
        }
    }

    pub fn set_state(&self, state: LifecycleState) {
        {
            let mut run = self.run.lock().unwrap();
            run.state = state;
            self.run_changed.notify_all();
        }
        self.doorbell.ring();
    }

    pub fn port(&self, index: usize) -> Result<&Port> {
        self.ports.get(index).ok_or(Error::BadPortIndex(index))
    }

    pub fn emit(&self, event: Event) {
        let callbacks = self.callbacks.read().unwrap().clone();
        match callbacks {
            Some(callbacks) => callbacks.on_event(self.id, event),
            None => tracing::debug!(component = %self.name, event = %event, "no callbacks installed"),
        }
    }

    /// Give a buffer leaving `port` to whoever receives it next: the
    /// tunnel peer, or the client through the done callbacks.
    pub fn hand_off(&self, port: usize, header: BufferHeader) {
        let Some(p) = self.ports.get(port) else {
            tracing::error!(component = %self.name, port, "hand-off on unknown port");
            return;
        };
        let tunnel = p.tunnel();
        if self.config.tracing.buffer_events {
            observability::trace_hand_off(&self.name, port, header.filled_len(), tunnel.is_some());
        }
        if let Some(link) = tunnel {
            match link.peer() {
                Some(peer) => peer.inner.tunnel_receive(link.peer_port, header),
                None => tracing::warn!(
                    component = %self.name,
                    port,
                    "tunnel peer is gone, dropping buffer"
                ),
            }
            return;
        }
        let callbacks = self.callbacks.read().unwrap().clone();
        match callbacks {
            Some(callbacks) if p.is_input() => callbacks.on_empty_buffer_done(self.id, header),
            Some(callbacks) => callbacks.on_fill_buffer_done(self.id, header),
            None => tracing::warn!(
                component = %self.name,
                port,
                "no callbacks installed, dropping buffer"
            ),
        }
    }

    /// A buffer arriving from the tunnel peer.
    ///
    /// Accepted in every state but `Invalid`; a buffer landing on a port
    /// that is being flushed is picked up by the flush's final pass.
    pub fn tunnel_receive(&self, port: usize, mut header: BufferHeader) {
        if self.state() == LifecycleState::Invalid {
            tracing::warn!(component = %self.name, port, "invalid component dropped a tunneled buffer");
            return;
        }
        let Some(p) = self.ports.get(port) else {
            tracing::error!(component = %self.name, port, "tunneled buffer for unknown port");
            return;
        };
        if !p.is_input() {
            header.reset();
        }
        p.enqueue(header);
        self.doorbell.ring();
    }

    /// The tunnel supplier on the other end created a buffer for `port`.
    pub fn tunnel_associate(&self, port: usize, id: BufferId) -> Result<()> {
        self.port(port)?.associate(id)
    }

    /// The tunnel supplier on the other end destroyed a buffer of `port`.
    pub fn tunnel_dissociate(&self, port: usize, id: BufferId) -> Result<()> {
        self.port(port)?.dissociate(id)
    }
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
