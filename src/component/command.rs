//! Commands and the thread that executes them.
//!
//! Commands run strictly one after another, so at most one transition is
//! ever in flight. Each finishes with exactly one event: `CmdComplete` on
//! success, `Error` otherwise (a whole-component flush completes once per
//! port).

use super::state::{TransitionKind, classify};
use super::{Inner, LifecycleState, Port, worker};
use crate::buffer::BufferHeader;
use crate::defaults::DEPOPULATE_POLL;
use crate::error::{Error, Result};
use crate::event::{CompletedCommand, Event};
use crate::metadata::Mark;
use crate::observability;
use crate::tunnel::TunnelLink;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread;

/// Asynchronous commands accepted by [`Component::send_command`](super::Component::send_command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Transition to a lifecycle state.
    StateSet(LifecycleState),
    /// Flush one port, or every port with `None`.
    Flush(Option<usize>),
    /// Enable a port, populating it outside `Loaded`.
    PortEnable(usize),
    /// Disable a port, flushing and depopulating it outside `Loaded`.
    PortDisable(usize),
    /// Attach `mark` to the next buffer taken from `port`.
    MarkBuffer {
        /// Port whose next buffer carries the mark.
        port: usize,
        /// The mark.
        mark: Mark,
    },
}

impl Command {
    /// Port the command addresses, if any.
    pub fn port(&self) -> Option<usize> {
        match self {
            Command::StateSet(_) | Command::Flush(None) => None,
            Command::Flush(Some(port))
            | Command::PortEnable(port)
            | Command::PortDisable(port)
            | Command::MarkBuffer { port, .. } => Some(*port),
        }
    }
}

pub(crate) enum Request {
    Command(Command),
    Shutdown,
}

/// Command thread body. Holds the component weakly so that dropping the
/// last handle lets it go.
pub(crate) fn run(component: Weak<Inner>, requests: kanal::Receiver<Request>) {
    while let Ok(request) = requests.recv() {
        let command = match request {
            Request::Command(command) => command,
            Request::Shutdown => break,
        };
        let Some(inner) = component.upgrade() else {
            break;
        };
        let events = inner.execute(command);
        // Settle the count before completion is visible to the client.
        inner.pending.fetch_sub(1, Ordering::AcqRel);
        for event in events {
            inner.emit(event);
        }
    }
    tracing::debug!("command thread exiting");
}

// ============================================================================
// Dispatch
// ============================================================================

impl Inner {
    /// Run one command and return the events that report its outcome.
    fn execute(self: &Arc<Self>, command: Command) -> Vec<Event> {
        let state = self.state();
        if state == LifecycleState::Invalid {
            return vec![Event::Error(Error::InvalidState)];
        }
        match command {
            Command::StateSet(to) => match self.transition(state, to) {
                Ok(()) => vec![Event::CmdComplete(CompletedCommand::StateSet(to))],
                Err(err) => {
                    tracing::warn!(component = %self.name, from = %state, to = %to, error = %err, "transition failed");
                    vec![Event::Error(err)]
                }
            },
            Command::Flush(target) => {
                if !state.has_worker() {
                    return vec![Event::Error(Error::wrong_state("flush", state))];
                }
                let ports: Vec<usize> = match target {
                    Some(port) => vec![port],
                    None => (0..self.ports.len()).collect(),
                };
                self.flush_ports(&ports, || {});
                ports
                    .into_iter()
                    .map(|port| Event::CmdComplete(CompletedCommand::Flush(port)))
                    .collect()
            }
            Command::PortEnable(port) => match self.enable_port(port) {
                Ok(()) => vec![Event::CmdComplete(CompletedCommand::PortEnable(port))],
                Err(err) => vec![Event::Error(err)],
            },
            Command::PortDisable(port) => match self.disable_port(port) {
                Ok(()) => vec![Event::CmdComplete(CompletedCommand::PortDisable(port))],
                Err(err) => vec![Event::Error(err)],
            },
            Command::MarkBuffer { port, mark } => {
                self.ports[port].push_mark(mark);
                self.doorbell.ring();
                vec![Event::CmdComplete(CompletedCommand::MarkBuffer(port))]
            }
        }
    }

    fn transition(self: &Arc<Self>, from: LifecycleState, to: LifecycleState) -> Result<()> {
        let kind = classify(from, to)?;
        tracing::debug!(component = %self.name, from = %from, to = %to, kind = ?kind, "transition started");
        match kind {
            TransitionKind::Populate => self.populate(from)?,
            TransitionKind::Depopulate => self.depopulate(),
            TransitionKind::Stop => self.stop(from),
            TransitionKind::Start => self.start(to)?,
            TransitionKind::Toggle => {
                self.variant.lock().unwrap().on_transition(from, to)?;
                self.set_state(to);
                if to == LifecycleState::Pause {
                    self.wait_parked();
                }
            }
            TransitionKind::Resources => self.set_state(to),
            TransitionKind::Invalidate => {
                self.invalidate(from);
                return Err(Error::InvalidState);
            }
        }
        observability::trace_transition(&self.name, &from.to_string(), &to.to_string());
        Ok(())
    }

    // ========================================================================
    // Population
    // ========================================================================

    /// Loaded/WaitForResources -> Idle.
    fn populate(self: &Arc<Self>, from: LifecycleState) -> Result<()> {
        self.variant.lock().unwrap().on_transition(from, LifecycleState::Idle)?;
        if let Err(err) = self.spawn_worker() {
            self.undo_open(from);
            return Err(err);
        }

        let enabled: Vec<usize> = (0..self.ports.len())
            .filter(|&p| self.ports[p].is_enabled())
            .collect();
        if let Err(err) = self.populate_ports(&enabled) {
            tracing::warn!(component = %self.name, error = %err, "population failed, returning to Loaded");
            for &p in &enabled {
                self.release_supplied(p);
            }
            self.stop_worker();
            self.undo_open(from);
            self.set_state(LifecycleState::Loaded);
            return Err(err);
        }

        self.set_state(LifecycleState::Idle);
        self.wait_parked();
        tracing::debug!(component = %self.name, ports = enabled.len(), "ports populated");
        Ok(())
    }

    fn undo_open(&self, from: LifecycleState) {
        if let Err(err) = self
            .variant
            .lock()
            .unwrap()
            .on_transition(LifecycleState::Idle, from)
        {
            tracing::warn!(component = %self.name, error = %err, "undoing resource acquisition failed");
        }
    }

    fn populate_ports(&self, ports: &[usize]) -> Result<()> {
        // Allocate first: a tunnel peer may be waiting on these.
        for &p in ports {
            if self.ports[p].is_supplier() {
                self.allocate_supplied(p)?;
            }
        }
        for &p in ports {
            self.wait_port_populated(p)?;
        }
        Ok(())
    }

    fn wait_port_populated(&self, port: usize) -> Result<()> {
        let timeout = self.config.population_timeout;
        if self.ports[port].wait_populated(timeout) {
            return Ok(());
        }
        Err(Error::InsufficientResources(format!(
            "port {} not populated within {:?}",
            port,
            timeout.unwrap_or_default()
        )))
    }

    /// Create the buffers of a tunnel this port supplies and associate
    /// them with both ends.
    fn allocate_supplied(&self, port: usize) -> Result<()> {
        let p = &self.ports[port];
        let link = supplier_link(p)?;
        let peer = link
            .peer()
            .ok_or_else(|| Error::PortsNotCompatible(format!("tunnel peer of port {} is gone", port)))?;
        let def = p.definition();
        let missing = def.buffer_count_actual.saturating_sub(p.assigned_count());
        for _ in 0..missing {
            let mut header = BufferHeader::allocate(def.buffer_size, self.id, 0)?;
            if p.is_input() {
                header.set_input_port(Some(port));
                header.set_output_port(Some(link.peer_port));
            } else {
                header.set_output_port(Some(port));
                header.set_input_port(Some(link.peer_port));
            }
            p.associate(header.id())?;
            if let Err(err) = peer.inner.tunnel_associate(link.peer_port, header.id()) {
                let _ = p.dissociate(header.id());
                return Err(err);
            }
            p.enqueue(header);
        }
        tracing::debug!(
            component = %self.name,
            port,
            count = def.buffer_count_actual,
            size = def.buffer_size,
            "tunnel buffers allocated"
        );
        Ok(())
    }

    /// Destroy a supplied buffer on both ends of its tunnel.
    fn free_supplied(&self, port: &Port, link: &TunnelLink, header: BufferHeader) {
        let id = header.id();
        if let Err(err) = port.dissociate(id) {
            tracing::warn!(component = %self.name, port = port.index(), error = %err, "dissociate failed");
        }
        if let Some(peer) = link.peer() {
            if let Err(err) = peer.inner.tunnel_dissociate(link.peer_port, id) {
                tracing::warn!(component = %self.name, port = port.index(), error = %err, "peer dissociate failed");
            }
        }
        drop(header.release());
    }

    /// Free every supplied buffer currently queued on `port`.
    fn release_supplied(&self, port: usize) {
        let p = &self.ports[port];
        let Some(link) = p.tunnel().filter(|l| l.flags.supplier) else {
            return;
        };
        for header in p.drain() {
            self.free_supplied(p, &link, header);
        }
    }

    /// Block until `port` has no buffers left.
    ///
    /// A supplier collects its buffers as they come home and frees them.
    /// Anyone else waits for the owners to free theirs, returning any
    /// buffer that still shows up in the meantime.
    fn depopulate_port(&self, port: usize) {
        let p = &self.ports[port];
        match p.tunnel().filter(|l| l.flags.supplier) {
            Some(link) => {
                while p.assigned_count() > 0 {
                    if let Some(header) = p.pop_queued_wait(DEPOPULATE_POLL) {
                        self.free_supplied(p, &link, header);
                    }
                }
            }
            None => {
                while !p.wait_depopulated_for(Some(DEPOPULATE_POLL)) {
                    for mut header in p.drain() {
                        header.reset();
                        self.hand_off(port, header);
                    }
                }
            }
        }
        tracing::debug!(component = %self.name, port, "port depopulated");
    }

    /// Idle -> Loaded.
    fn depopulate(&self) {
        let enabled: Vec<usize> = (0..self.ports.len())
            .filter(|&p| self.ports[p].is_enabled())
            .collect();
        self.flush_ports(&enabled, || {});
        for &p in &enabled {
            self.depopulate_port(p);
        }
        self.set_state(LifecycleState::Loaded);
        self.stop_worker();
        if let Err(err) = self
            .variant
            .lock()
            .unwrap()
            .on_transition(LifecycleState::Idle, LifecycleState::Loaded)
        {
            tracing::warn!(component = %self.name, error = %err, "release hook failed");
        }
    }

    // ========================================================================
    // Running
    // ========================================================================

    /// Idle -> Executing/Pause.
    fn start(&self, to: LifecycleState) -> Result<()> {
        self.variant.lock().unwrap().on_transition(LifecycleState::Idle, to)?;
        self.set_state(to);
        for p in 0..self.ports.len() {
            self.prime(p);
        }
        Ok(())
    }

    /// Send an input supplier's empty buffers upstream to be filled.
    fn prime(&self, port: usize) {
        let p = &self.ports[port];
        if !p.is_input() || !p.is_enabled() || !p.is_supplier() {
            return;
        }
        let buffers = p.drain();
        tracing::debug!(component = %self.name, port, count = buffers.len(), "priming upstream");
        for header in buffers {
            self.hand_off(port, header);
        }
    }

    /// Executing/Pause -> Idle.
    fn stop(&self, from: LifecycleState) {
        let all: Vec<usize> = (0..self.ports.len()).collect();
        self.flush_ports(&all, || self.set_state(LifecycleState::Idle));
        self.wait_parked();
        if let Err(err) = self
            .variant
            .lock()
            .unwrap()
            .on_transition(from, LifecycleState::Idle)
        {
            tracing::warn!(component = %self.name, error = %err, "stop hook failed");
            self.emit(Event::Error(err));
        }
    }

    /// Anything -> Invalid. Best effort, no ordering guarantees.
    fn invalidate(&self, from: LifecycleState) {
        tracing::error!(component = %self.name, from = %from, "component invalidated");
        {
            let mut run = self.run.lock().unwrap();
            run.state = LifecycleState::Invalid;
            run.exit = true;
            self.run_changed.notify_all();
        }
        self.doorbell.ring();

        for (index, port) in self.ports.iter().enumerate() {
            let (drained, _) = port.begin_flush();
            let link = port.tunnel().filter(|l| l.flags.supplier);
            for mut header in drained {
                match &link {
                    Some(link) => self.free_supplied(port, link, header),
                    None => {
                        header.reset();
                        self.hand_off(index, header);
                    }
                }
            }
        }
        // Detach: the worker may be stuck inside a device call.
        drop(self.worker.lock().unwrap().take());

        if let Err(err) = self
            .variant
            .lock()
            .unwrap()
            .on_transition(from, LifecycleState::Invalid)
        {
            tracing::warn!(component = %self.name, error = %err, "teardown hook failed");
        }
    }

    // ========================================================================
    // Ports
    // ========================================================================

    fn enable_port(&self, port: usize) -> Result<()> {
        let p = &self.ports[port];
        if p.is_enabled() {
            return Ok(());
        }
        let state = self.state();
        p.set_enabled(true);
        if state.is_configurable() {
            return Ok(());
        }

        let populated = if p.is_supplier() {
            self.allocate_supplied(port)
        } else {
            self.wait_port_populated(port)
        };
        if let Err(err) = populated {
            self.release_supplied(port);
            p.set_enabled(false);
            return Err(err);
        }
        if state != LifecycleState::Idle {
            self.prime(port);
        }
        self.doorbell.ring();
        tracing::debug!(component = %self.name, port, "port enabled");
        Ok(())
    }

    fn disable_port(&self, port: usize) -> Result<()> {
        let p = &self.ports[port];
        if !p.is_enabled() {
            return Ok(());
        }
        if self.state().is_configurable() {
            p.set_enabled(false);
            return Ok(());
        }
        self.flush_ports(&[port], || p.set_enabled(false));
        self.depopulate_port(port);
        tracing::debug!(component = %self.name, port, "port disabled");
        Ok(())
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Drain `ports`, returning every buffer to its owner unprocessed.
    ///
    /// Completes only after the worker has finished any step that holds a
    /// buffer from these ports. `before_release` runs while the worker is
    /// still held off, so a state change made there is observed before
    /// processing can resume. A tunnel supplier keeps its own buffers.
    pub(crate) fn flush_ports(&self, ports: &[usize], before_release: impl FnOnce()) {
        tracing::debug!(component = %self.name, ports = ?ports, "flush started");
        let mut kept = Vec::new();
        let mut waiting = Vec::new();
        for &index in ports {
            let (drained, must_wait) = self.ports[index].begin_flush();
            self.return_flushed(index, drained, &mut kept);
            if must_wait {
                waiting.push(index);
            }
        }

        self.doorbell.ring();
        for &index in &waiting {
            self.ports[index].wait_flush_ack();
        }

        before_release();

        for &index in ports {
            let drained = self.ports[index].drain();
            self.return_flushed(index, drained, &mut kept);
        }
        for (index, header) in kept {
            self.ports[index].enqueue(header);
        }
        for &index in ports {
            self.ports[index].end_flush();
        }
        self.doorbell.ring();
        tracing::debug!(component = %self.name, ports = ?ports, "flush done");
    }

    fn return_flushed(
        &self,
        index: usize,
        drained: Vec<BufferHeader>,
        kept: &mut Vec<(usize, BufferHeader)>,
    ) {
        let supplier = self.ports[index].is_supplier();
        for mut header in drained {
            header.reset();
            if supplier {
                kept.push((index, header));
            } else {
                self.hand_off(index, header);
            }
        }
    }

    // ========================================================================
    // Worker control
    // ========================================================================

    fn spawn_worker(self: &Arc<Self>) -> Result<()> {
        {
            let mut run = self.run.lock().unwrap();
            run.exit = false;
            run.parked = false;
        }
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || worker::run(inner))
            .map_err(|e| Error::InsufficientResources(format!("worker thread: {}", e)))?;
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn stop_worker(&self) {
        {
            let mut run = self.run.lock().unwrap();
            run.exit = true;
            self.run_changed.notify_all();
        }
        self.doorbell.ring();
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(component = %self.name, "worker thread panicked");
            }
        }
    }

    /// Block until the worker acknowledges it is not processing.
    fn wait_parked(&self) {
        let mut run = self.run.lock().unwrap();
        while !run.parked && !run.exit {
            run = self.run_changed.wait(run).unwrap();
        }
    }
}

fn supplier_link(port: &Port) -> Result<TunnelLink> {
    port.tunnel()
        .filter(|l| l.flags.supplier)
        .ok_or_else(|| Error::BadParameter(format!("port {} does not supply a tunnel", port.index())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ComponentId;

    #[test]
    fn test_command_port() {
        assert_eq!(Command::StateSet(LifecycleState::Idle).port(), None);
        assert_eq!(Command::Flush(None).port(), None);
        assert_eq!(Command::Flush(Some(2)).port(), Some(2));
        assert_eq!(Command::PortDisable(1).port(), Some(1));
        let mark = Mark::new(ComponentId::next(), 1);
        assert_eq!(Command::MarkBuffer { port: 3, mark }.port(), Some(3));
    }
}
