//! Passthrough - copies input payloads to output buffers unchanged.

use crate::buffer::BufferHeader;
use crate::component::{
    ComponentConfig, ConfigValue, Lifecycle, PortDefinition, PortDomain, Transform,
    TransformOutcome, Tunable, Variant,
};
use crate::error::{Error, Result};
use crate::registry::{API_VERSION, ComponentFactory};

/// A transform that copies each input payload into its output buffer.
///
/// This is useful for:
/// - Testing tunnels and flush behavior
/// - Placeholder stages while wiring a pipeline
///
/// Config keys: `processed` (read-only count of copied buffers).
#[derive(Debug, Default)]
pub struct Passthrough {
    processed: u64,
}

impl Passthrough {
    /// Create a new Passthrough.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers copied.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// One video input (port 0) and one video output (port 1).
    pub fn default_config(name: &str) -> ComponentConfig {
        ComponentConfig::new(name)
            .with_port(PortDefinition::input(0, PortDomain::Video))
            .with_port(PortDefinition::output(1, PortDomain::Video))
    }

    /// Registry entry.
    pub fn factory() -> ComponentFactory {
        ComponentFactory::new(
            "passthrough",
            "copies input buffers to output buffers",
            API_VERSION,
            Self::default_config,
            |_| Ok(Variant::filter(Passthrough::new())),
        )
    }
}

impl Lifecycle for Passthrough {}

impl Tunable for Passthrough {
    fn get_config(&self, key: &str) -> Result<ConfigValue> {
        match key {
            "processed" => Ok(ConfigValue::Uint(self.processed)),
            _ => Err(Error::UnsupportedIndex(key.to_string())),
        }
    }
}

impl Transform for Passthrough {
    fn transform(
        &mut self,
        input: &BufferHeader,
        output: &mut BufferHeader,
    ) -> Result<TransformOutcome> {
        output.write(input.filled())?;
        self.processed += 1;
        Ok(TransformOutcome::Produced)
    }
}
