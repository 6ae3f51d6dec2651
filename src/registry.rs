//! Component registry: names to factories.
//!
//! The registry is an ordinary value. Whoever builds a pipeline creates one
//! (usually [`Registry::with_builtins`]), registers any extra factories and
//! passes it by reference to the code that instantiates components.
//!
//! ```rust,ignore
//! let registry = Registry::with_builtins();
//! let camera = registry.instantiate("pattern", "camera")?;
//! let sink = registry.instantiate("null_sink", "display")?;
//! ```

use crate::component::{Component, ComponentConfig, Variant};
use crate::components::{NullSink, Passthrough, PatternDevice};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Version of the component API this runtime speaks.
///
/// Factories declaring any other version are refused.
pub const API_VERSION: u32 = 1;

/// Builds the variant for a new component instance.
pub type BuildFn = fn(&ComponentConfig) -> Result<Variant>;

/// Produces the default config (port layout) for an instance name.
pub type DefaultConfigFn = fn(&str) -> ComponentConfig;

/// A named recipe for one kind of component.
#[derive(Clone)]
pub struct ComponentFactory {
    name: String,
    description: String,
    api_version: u32,
    default_config: DefaultConfigFn,
    build: BuildFn,
}

impl ComponentFactory {
    /// Describe a factory.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        api_version: u32,
        default_config: DefaultConfigFn,
        build: BuildFn,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            api_version,
            default_config,
            build,
        }
    }

    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// API version the factory was written against.
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Default config for an instance called `instance_name`.
    pub fn default_config(&self, instance_name: &str) -> ComponentConfig {
        (self.default_config)(instance_name)
    }
}

impl fmt::Debug for ComponentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentFactory")
            .field("name", &self.name)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Registry of component factories.
pub struct Registry {
    factories: RwLock<HashMap<String, Arc<ComponentFactory>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// A registry holding the built-in components
    /// (`pattern`, `passthrough`, `null_sink`).
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for factory in [
            PatternDevice::factory(),
            Passthrough::factory(),
            NullSink::factory(),
        ] {
            if let Err(err) = registry.register(factory) {
                tracing::error!(error = %err, "failed to register built-in component");
            }
        }
        registry
    }

    /// Add a factory.
    ///
    /// Fails with `VersionMismatch` if the factory speaks another API
    /// version, and `BadParameter` if the name is already taken.
    pub fn register(&self, factory: ComponentFactory) -> Result<()> {
        if factory.api_version != API_VERSION {
            return Err(Error::VersionMismatch {
                expected: API_VERSION,
                found: factory.api_version,
            });
        }
        let mut factories = self.factories.write().unwrap();
        if factories.contains_key(&factory.name) {
            return Err(Error::BadParameter(format!(
                "component `{}` already registered",
                factory.name
            )));
        }
        tracing::debug!(component = %factory.name, "registered component factory");
        factories.insert(factory.name.clone(), Arc::new(factory));
        Ok(())
    }

    /// Remove a factory. Returns true if it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.factories.write().unwrap().remove(name).is_some()
    }

    /// Check if a factory is registered.
    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.read().unwrap().contains_key(name)
    }

    /// Look up a factory.
    pub fn factory(&self, name: &str) -> Option<Arc<ComponentFactory>> {
        self.factories.read().unwrap().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn list_factories(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate `factory` with its default config, named `instance_name`.
    pub fn instantiate(&self, factory: &str, instance_name: &str) -> Result<Component> {
        let entry = self.lookup(factory)?;
        let config = entry.default_config(instance_name);
        Self::build(&entry, config)
    }

    /// Instantiate `factory` with an explicit config.
    pub fn instantiate_with(&self, factory: &str, config: ComponentConfig) -> Result<Component> {
        let entry = self.lookup(factory)?;
        Self::build(&entry, config)
    }

    /// Release a component obtained from this registry.
    ///
    /// The component must be in `Loaded` or `Invalid`.
    pub fn free_handle(&self, component: Component) -> Result<()> {
        component.shutdown()
    }

    fn lookup(&self, name: &str) -> Result<Arc<ComponentFactory>> {
        self.factory(name)
            .ok_or_else(|| Error::BadParameter(format!("unknown component `{name}`")))
    }

    fn build(factory: &ComponentFactory, config: ComponentConfig) -> Result<Component> {
        let variant = (factory.build)(&config)?;
        let component = Component::new(config, variant)?;
        tracing::info!(
            factory = %factory.name,
            component = %component.name(),
            id = %component.id(),
            "component instantiated"
        );
        Ok(component)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("factories", &self.list_factories())
            .finish()
    }
}
