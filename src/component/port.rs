//! Ports: directional endpoints owning a buffer queue and population state.
//!
//! A port's dynamic state lives behind one mutex so that "take a buffer for
//! processing" and "start flushing" can never interleave: the worker either
//! observes the flush and takes nothing, or takes the buffer before the
//! flush and is counted in `held`, which the flush then waits for.

use crate::buffer::BufferHeader;
use crate::error::{Error, Result};
use crate::metadata::{BufferId, Mark};
use crate::sync::Semaphore;
use crate::tunnel::{BufferSupplier, TunnelLink};
use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Direction of a port (input or output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    /// Receives buffers from upstream.
    Input,
    /// Sends buffers downstream.
    Output,
}

/// Media domain carried by a port. Tunnels require equal domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PortDomain {
    /// Raw or compressed video.
    #[default]
    Video,
    /// Raw or compressed audio.
    Audio,
    /// Still images.
    Image,
    /// Anything else (metadata, clock).
    Other,
}

/// Static description of a port, as exchanged through `get/set_parameter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDefinition {
    /// Index of the port within its component.
    pub index: usize,
    /// Direction of the port.
    pub direction: PortDirection,
    /// Media domain.
    pub domain: PortDomain,
    /// Encoding within the domain (e.g. "yuyv"); `None` accepts anything.
    pub encoding: Option<String>,
    /// Number of buffers the port runs with.
    pub buffer_count_actual: usize,
    /// Minimum number of buffers the port can run with.
    pub buffer_count_min: usize,
    /// Size in bytes of every buffer.
    pub buffer_size: usize,
    /// Whether the port takes part in population and processing.
    pub enabled: bool,
    /// Whether all `buffer_count_actual` buffers are associated (read-only).
    pub populated: bool,
}

impl PortDefinition {
    /// Create an enabled port definition with default counts and size.
    pub fn new(index: usize, direction: PortDirection, domain: PortDomain) -> Self {
        Self {
            index,
            direction,
            domain,
            encoding: None,
            buffer_count_actual: crate::defaults::PORT_BUFFER_COUNT,
            buffer_count_min: crate::defaults::PORT_BUFFER_COUNT_MIN,
            buffer_size: crate::defaults::PORT_BUFFER_SIZE,
            enabled: true,
            populated: false,
        }
    }

    /// Input port in `domain`.
    pub fn input(index: usize, domain: PortDomain) -> Self {
        Self::new(index, PortDirection::Input, domain)
    }

    /// Output port in `domain`.
    pub fn output(index: usize, domain: PortDomain) -> Self {
        Self::new(index, PortDirection::Output, domain)
    }

    /// Set the encoding.
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Set the buffer count.
    pub fn with_buffers(mut self, count: usize, size: usize) -> Self {
        self.buffer_count_actual = count;
        self.buffer_count_min = self.buffer_count_min.min(count);
        self.buffer_size = size;
        self
    }

    /// Start the port disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Check if this is an input port.
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    /// Check if this is an output port.
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }

    /// Whether a tunnel between `self` and `other` can carry data.
    pub fn is_compatible_with(&self, other: &PortDefinition) -> bool {
        self.domain == other.domain
            && match (&self.encoding, &other.encoding) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => true,
            }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::BadParameter(format!(
                "port {} buffer size is zero",
                self.index
            )));
        }
        if self.buffer_count_actual == 0 || self.buffer_count_actual < self.buffer_count_min {
            return Err(Error::BadParameter(format!(
                "port {} buffer count {} below minimum {}",
                self.index,
                self.buffer_count_actual,
                self.buffer_count_min.max(1)
            )));
        }
        Ok(())
    }
}

/// Mutable port state, guarded by one mutex.
struct PortInner {
    definition: PortDefinition,
    populated: bool,
    assigned: HashSet<BufferId>,
    queue: VecDeque<BufferHeader>,
    /// Buffers from this port currently held by the worker thread.
    held: usize,
    flushing: bool,
    flush_waiting: bool,
    tunnel: Option<TunnelLink>,
    supplier_preference: BufferSupplier,
    pending_marks: VecDeque<Mark>,
}

/// A port instance owned by a component.
pub(crate) struct Port {
    index: usize,
    direction: PortDirection,
    inner: Mutex<PortInner>,
    /// Signalled when a buffer is queued; used by supplier teardown.
    arrived: Condvar,
    populated_sem: Semaphore,
    depopulated_sem: Semaphore,
    flush_sem: Semaphore,
}

impl Port {
    pub fn new(definition: PortDefinition) -> Self {
        Self {
            index: definition.index,
            direction: definition.direction,
            inner: Mutex::new(PortInner {
                definition,
                populated: false,
                assigned: HashSet::new(),
                queue: VecDeque::new(),
                held: 0,
                flushing: false,
                flush_waiting: false,
                tunnel: None,
                supplier_preference: BufferSupplier::Unspecified,
                pending_marks: VecDeque::new(),
            }),
            arrived: Condvar::new(),
            populated_sem: Semaphore::new(0),
            depopulated_sem: Semaphore::new(0),
            flush_sem: Semaphore::new(0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn definition(&self) -> PortDefinition {
        let inner = self.inner.lock().unwrap();
        let mut def = inner.definition.clone();
        def.populated = inner.populated;
        def
    }

    /// Replace the mutable parts of the definition.
    pub fn set_definition(&self, update: &PortDefinition) -> Result<()> {
        if update.index != self.index || update.direction != self.direction {
            return Err(Error::BadParameter(format!(
                "port {} index/direction are read-only",
                self.index
            )));
        }
        update.validate()?;
        let mut inner = self.inner.lock().unwrap();
        if !inner.assigned.is_empty() {
            return Err(Error::BadParameter(format!(
                "port {} has buffers associated",
                self.index
            )));
        }
        let enabled = inner.definition.enabled;
        inner.definition = PortDefinition {
            enabled,
            populated: false,
            ..update.clone()
        };
        Ok(())
    }

    /// Adopt the larger buffer count and size of a tunnel peer.
    pub fn reconcile_buffers(&self, count: usize, size: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.definition.buffer_count_actual = inner.definition.buffer_count_actual.max(count);
        inner.definition.buffer_size = inner.definition.buffer_size.max(size);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().unwrap().definition.enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().definition.enabled = enabled;
    }

    pub fn is_populated(&self) -> bool {
        self.inner.lock().unwrap().populated
    }

    pub fn assigned_count(&self) -> usize {
        self.inner.lock().unwrap().assigned.len()
    }

    pub fn is_associated(&self, id: BufferId) -> bool {
        self.inner.lock().unwrap().assigned.contains(&id)
    }

    // ------------------------------------------------------------------
    // Population protocol
    // ------------------------------------------------------------------

    /// Record a new buffer association, releasing the population
    /// rendezvous when the configured count is reached.
    ///
    /// Each rendezvous semaphore holds at most one permit, and only while
    /// the condition it announces still holds: an unconsumed permit is
    /// retracted when the condition is undone.
    pub fn associate(&self, id: BufferId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let target = inner.definition.buffer_count_actual;
        if inner.assigned.len() >= target {
            return Err(Error::InsufficientResources(format!(
                "port {} already has {} buffers",
                self.index, target
            )));
        }
        if inner.assigned.is_empty() {
            self.depopulated_sem.try_acquire();
        }
        inner.assigned.insert(id);
        if inner.assigned.len() == target {
            inner.populated = true;
            self.populated_sem.release();
        }
        Ok(())
    }

    /// Drop a buffer association, releasing the depopulation rendezvous
    /// when the last one goes.
    pub fn dissociate(&self, id: BufferId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.assigned.remove(&id) {
            return Err(Error::BadParameter(format!(
                "buffer {} is not associated with port {}",
                id.as_u64(),
                self.index
            )));
        }
        if inner.populated {
            inner.populated = false;
            self.populated_sem.try_acquire();
        }
        if inner.assigned.is_empty() {
            self.depopulated_sem.release();
        }
        Ok(())
    }

    /// Block until the port is populated, at most `timeout`.
    pub fn wait_populated(&self, timeout: Option<Duration>) -> bool {
        {
            let inner = self.inner.lock().unwrap();
            if inner.populated {
                self.populated_sem.try_acquire();
                return true;
            }
        }
        self.populated_sem.acquire_timeout(timeout)
    }

    /// Block until every buffer has been freed, at most `timeout`.
    pub fn wait_depopulated_for(&self, timeout: Option<Duration>) -> bool {
        {
            let inner = self.inner.lock().unwrap();
            if inner.assigned.is_empty() {
                self.depopulated_sem.try_acquire();
                return true;
            }
        }
        self.depopulated_sem.acquire_timeout(timeout)
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Append a buffer to the queue.
    pub fn enqueue(&self, header: BufferHeader) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push_back(header);
        self.arrived.notify_all();
    }

    /// Queue depth.
    pub fn queued(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    /// Take the oldest buffer for processing, unless the port is flushing
    /// or disabled. The buffer counts as held until
    /// [`finish_processing`](Self::finish_processing).
    pub fn take_for_processing(&self) -> Option<BufferHeader> {
        let mut inner = self.inner.lock().unwrap();
        if inner.flushing || !inner.definition.enabled {
            return None;
        }
        let mut header = inner.queue.pop_front()?;
        inner.held += 1;
        if header.mark().is_none() {
            if let Some(mark) = inner.pending_marks.pop_front() {
                header.set_mark(mark);
            }
        }
        Some(header)
    }

    /// Put a buffer taken for processing back at the head of the queue.
    pub fn requeue_front(&self, header: BufferHeader) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push_front(header);
        inner.held = inner.held.saturating_sub(1);
    }

    /// The worker has handed a held buffer off.
    pub fn finish_processing(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.held = inner.held.saturating_sub(1);
    }

    /// Wait up to `timeout` for a queued buffer, then pop it.
    pub fn pop_queued_wait(&self, timeout: Duration) -> Option<BufferHeader> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(header) = inner.queue.pop_front() {
                return Some(header);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.arrived.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
        }
    }

    /// Remove every queued buffer.
    pub fn drain(&self) -> Vec<BufferHeader> {
        self.inner.lock().unwrap().queue.drain(..).collect()
    }

    // ------------------------------------------------------------------
    // Flush
    // ------------------------------------------------------------------

    /// Mark the port as flushing and drain its queue.
    ///
    /// Returns the drained buffers and whether the worker holds buffers
    /// from this port, in which case the caller must
    /// [`wait_flush_ack`](Self::wait_flush_ack).
    pub fn begin_flush(&self) -> (Vec<BufferHeader>, bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.flushing = true;
        let drained = inner.queue.drain(..).collect();
        let must_wait = inner.held > 0;
        inner.flush_waiting = must_wait;
        (drained, must_wait)
    }

    pub fn wait_flush_ack(&self) {
        self.flush_sem.acquire();
    }

    /// Worker side: acknowledge a pending flush once nothing is held.
    ///
    /// This is the only place the flush semaphore is released.
    pub fn ack_flush(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.flush_waiting && inner.held == 0 {
            inner.flush_waiting = false;
            self.flush_sem.release();
            return true;
        }
        false
    }

    pub fn end_flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.flushing = false;
        inner.flush_waiting = false;
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.lock().unwrap().flushing
    }

    // ------------------------------------------------------------------
    // Tunnel and marks
    // ------------------------------------------------------------------

    pub fn tunnel(&self) -> Option<TunnelLink> {
        self.inner.lock().unwrap().tunnel.clone()
    }

    pub fn set_tunnel(&self, link: Option<TunnelLink>) {
        self.inner.lock().unwrap().tunnel = link;
    }

    /// Whether this side supplies the buffers of its tunnel.
    pub fn is_supplier(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .tunnel
            .as_ref()
            .is_some_and(|t| t.flags.supplier)
    }

    pub fn supplier_preference(&self) -> BufferSupplier {
        self.inner.lock().unwrap().supplier_preference
    }

    pub fn set_supplier_preference(&self, supplier: BufferSupplier) {
        self.inner.lock().unwrap().supplier_preference = supplier;
    }

    pub fn push_mark(&self, mark: Mark) {
        self.inner.lock().unwrap().pending_marks.push_back(mark);
    }
}
