//! Client callbacks: how a component hands events and buffers back.

use crate::buffer::BufferHeader;
use crate::error::{Error, Result};
use crate::event::{CompletedCommand, Event};
use crate::metadata::ComponentId;
use std::time::{Duration, Instant};

/// Receiver of a component's asynchronous output.
///
/// Called from the component's own threads; implementations must not
/// block for long. It is fine to call back into the component (for
/// example `fill_this_buffer` from `on_fill_buffer_done`).
pub trait Callbacks: Send + Sync {
    /// A command completed, an error occurred, or a flag/mark was seen.
    fn on_event(&self, component: ComponentId, event: Event);

    /// An input buffer was consumed and is the client's again.
    fn on_empty_buffer_done(&self, component: ComponentId, header: BufferHeader);

    /// An output buffer was filled and is the client's again.
    fn on_fill_buffer_done(&self, component: ComponentId, header: BufferHeader);
}

/// [`Callbacks`] that forward everything into kanal channels.
///
/// # Example
///
/// ```rust,ignore
/// let (callbacks, rx) = ChannelCallbacks::new();
/// component.set_callbacks(Arc::new(callbacks));
/// component.send_command(Command::StateSet(LifecycleState::Idle))?;
/// rx.wait_complete(CompletedCommand::StateSet(LifecycleState::Idle), timeout)?;
/// ```
#[derive(Clone)]
pub struct ChannelCallbacks {
    events: kanal::Sender<(ComponentId, Event)>,
    empty_done: kanal::Sender<BufferHeader>,
    fill_done: kanal::Sender<BufferHeader>,
}

/// Receiving half of [`ChannelCallbacks`].
pub struct CallbackReceivers {
    /// Events, tagged with the raising component.
    pub events: kanal::Receiver<(ComponentId, Event)>,
    /// Buffers from `on_empty_buffer_done`.
    pub empty_done: kanal::Receiver<BufferHeader>,
    /// Buffers from `on_fill_buffer_done`.
    pub fill_done: kanal::Receiver<BufferHeader>,
}

impl ChannelCallbacks {
    /// Create a callback sink and its receivers.
    pub fn new() -> (Self, CallbackReceivers) {
        let (events_tx, events_rx) = kanal::unbounded();
        let (empty_tx, empty_rx) = kanal::unbounded();
        let (fill_tx, fill_rx) = kanal::unbounded();
        (
            Self {
                events: events_tx,
                empty_done: empty_tx,
                fill_done: fill_tx,
            },
            CallbackReceivers {
                events: events_rx,
                empty_done: empty_rx,
                fill_done: fill_rx,
            },
        )
    }
}

impl Callbacks for ChannelCallbacks {
    fn on_event(&self, component: ComponentId, event: Event) {
        if self.events.send((component, event)).is_err() {
            tracing::trace!(%component, "event receiver dropped");
        }
    }

    fn on_empty_buffer_done(&self, component: ComponentId, header: BufferHeader) {
        if self.empty_done.send(header).is_err() {
            tracing::warn!(%component, "empty-done receiver dropped, buffer lost");
        }
    }

    fn on_fill_buffer_done(&self, component: ComponentId, header: BufferHeader) {
        if self.fill_done.send(header).is_err() {
            tracing::warn!(%component, "fill-done receiver dropped, buffer lost");
        }
    }
}

impl CallbackReceivers {
    /// Next event within `timeout`.
    pub fn next_event(&self, timeout: Duration) -> Option<Event> {
        self.events.recv_timeout(timeout).ok().map(|(_, event)| event)
    }

    /// Wait for the first event matching `pred`, discarding others.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&Event) -> bool) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let event = self.next_event(remaining)?;
            if pred(&event) {
                return Some(event);
            }
        }
    }

    /// Wait for `command` to complete.
    ///
    /// An `Error` event arriving first is returned as the error; other
    /// events are discarded.
    pub fn wait_complete(&self, command: CompletedCommand, timeout: Duration) -> Result<()> {
        match self.wait_for(timeout, |e| e.is_complete(command) || e.is_error()) {
            Some(Event::Error(err)) => Err(err),
            Some(_) => Ok(()),
            None => Err(Error::Timeout("command completion")),
        }
    }

    /// Every event queued right now.
    pub fn drain_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(Some((_, event))) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Next buffer from `on_fill_buffer_done` within `timeout`.
    pub fn next_filled(&self, timeout: Duration) -> Option<BufferHeader> {
        self.fill_done.recv_timeout(timeout).ok()
    }

    /// Next buffer from `on_empty_buffer_done` within `timeout`.
    pub fn next_emptied(&self, timeout: Duration) -> Option<BufferHeader> {
        self.empty_done.recv_timeout(timeout).ok()
    }
}
