//! Construction-time configuration for a component.

use super::port::{PortDefinition, PortDirection};
use crate::defaults::COMMAND_QUEUE_DEPTH;
use crate::error::{Error, Result};
use crate::observability::TracingConfig;
use std::time::Duration;

/// Configuration shared by every component variant.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    /// Name used for thread names and log fields.
    pub name: String,
    /// Port layout; `ports[i].index` must equal `i`.
    pub ports: Vec<PortDefinition>,
    /// Upper bound on the Loaded -> Idle population rendezvous.
    ///
    /// `None` (default) waits forever, matching the classic synchronous
    /// handshake. With a bound, expiry aborts the transition with
    /// `InsufficientResources`.
    pub population_timeout: Option<Duration>,
    /// Capacity of the command channel.
    pub command_queue_depth: usize,
    /// Span behavior for the component's threads.
    pub tracing: TracingConfig,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            name: "component".to_string(),
            ports: Vec::new(),
            population_timeout: None,
            command_queue_depth: COMMAND_QUEUE_DEPTH,
            tracing: TracingConfig::default(),
        }
    }
}

impl ComponentConfig {
    /// A config with the given name and no ports.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a port; its index is forced to the next free slot.
    pub fn with_port(mut self, mut port: PortDefinition) -> Self {
        port.index = self.ports.len();
        self.ports.push(port);
        self
    }

    /// Bound the population wait.
    pub fn with_population_timeout(mut self, timeout: Duration) -> Self {
        self.population_timeout = Some(timeout);
        self
    }

    /// Set the command channel capacity.
    pub fn with_command_queue_depth(mut self, depth: usize) -> Self {
        self.command_queue_depth = depth;
        self
    }

    /// Set span behavior.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Index of the first port with `direction`.
    pub fn first_port(&self, direction: PortDirection) -> Option<usize> {
        self.ports.iter().position(|p| p.direction == direction)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::BadParameter("component name is empty".into()));
        }
        if self.command_queue_depth == 0 {
            return Err(Error::BadParameter("command queue depth is zero".into()));
        }
        for (i, port) in self.ports.iter().enumerate() {
            if port.index != i {
                return Err(Error::BadParameter(format!(
                    "port at position {} declares index {}",
                    i, port.index
                )));
            }
            port.validate()?;
        }
        Ok(())
    }
}
