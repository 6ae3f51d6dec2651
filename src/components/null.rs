//! NullSink - presents nothing, counts everything.

use crate::buffer::BufferHeader;
use crate::component::{
    ComponentConfig, ConfigValue, Lifecycle, PortDefinition, PortDomain, Present, Tunable,
    Variant,
};
use crate::error::{Error, Result};
use crate::registry::{API_VERSION, ComponentFactory};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A sink that discards every buffer after counting it.
///
/// The counter is shared, so a test can keep a handle to it after the
/// sink has moved into a component.
///
/// Config keys: `presented`, `bytes` (both read-only).
#[derive(Debug, Default)]
pub struct NullSink {
    presented: Arc<AtomicU64>,
    bytes: u64,
}

impl NullSink {
    /// Create a new NullSink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the presented-buffer counter.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.presented)
    }

    /// Number of buffers presented.
    pub fn count(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// One video input (port 0).
    pub fn default_config(name: &str) -> ComponentConfig {
        ComponentConfig::new(name).with_port(PortDefinition::input(0, PortDomain::Video))
    }

    /// Registry entry.
    pub fn factory() -> ComponentFactory {
        ComponentFactory::new(
            "null_sink",
            "counts and discards input buffers",
            API_VERSION,
            Self::default_config,
            |_| Ok(Variant::sink(NullSink::new())),
        )
    }
}

impl Lifecycle for NullSink {}

impl Tunable for NullSink {
    fn get_config(&self, key: &str) -> Result<ConfigValue> {
        match key {
            "presented" => Ok(ConfigValue::Uint(self.count())),
            "bytes" => Ok(ConfigValue::Uint(self.bytes)),
            _ => Err(Error::UnsupportedIndex(key.to_string())),
        }
    }
}

impl Present for NullSink {
    fn present(&mut self, buffer: &BufferHeader) -> Result<()> {
        self.presented.fetch_add(1, Ordering::Relaxed);
        self.bytes += buffer.filled_len() as u64;
        Ok(())
    }
}
