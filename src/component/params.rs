//! Typed parameter and config surface.
//!
//! Parameters are structural (port layout, tunnel supplier preference) and
//! are only writable while nothing depends on them: in `Loaded` /
//! `WaitForResources`, or on a disabled port. Config values are
//! variant-specific knobs routed to the component's [`Tunable`] impl in
//! any state.
//!
//! [`Tunable`]: super::Tunable

use super::port::PortDefinition;
use crate::tunnel::BufferSupplier;
use std::fmt;
use std::time::Duration;

/// A dynamically typed config value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    Uint(u64),
    /// Boolean flag.
    Bool(bool),
    /// Text.
    Text(String),
    /// Time span.
    Duration(Duration),
}

impl ConfigValue {
    /// The value as `u64`, if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// The value as `bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a duration.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{}", v),
            Self::Uint(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
            Self::Duration(v) => write!(f, "{:?}", v),
        }
    }
}

/// Which parameter to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamIndex {
    /// Definition of a port.
    PortDefinition(usize),
    /// Supplier preference of a port.
    BufferSupplier(usize),
}

/// A parameter value, read or written as a whole.
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// Port layout and buffer requirements.
    ///
    /// `index` and `direction` are read-only; `enabled` and `populated` are
    /// ignored on write (use the port commands).
    PortDefinition(PortDefinition),
    /// Explicit "I supply" request used when a tunnel is negotiated.
    BufferSupplier {
        /// Port index.
        port: usize,
        /// Requested supplier.
        supplier: BufferSupplier,
    },
}

impl Parameter {
    /// Port the parameter applies to.
    pub fn port(&self) -> usize {
        match self {
            Self::PortDefinition(def) => def.index,
            Self::BufferSupplier { port, .. } => *port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::PortDomain;

    #[test]
    fn test_config_value_conversions() {
        assert_eq!(ConfigValue::Uint(3).as_u64(), Some(3));
        assert_eq!(ConfigValue::Int(3).as_u64(), Some(3));
        assert_eq!(ConfigValue::Int(-1).as_u64(), None);
        assert_eq!(ConfigValue::Bool(true).as_bool(), Some(true));
        assert_eq!(ConfigValue::Text("x".into()).as_bool(), None);
        assert_eq!(
            ConfigValue::Duration(Duration::from_millis(5)).as_duration(),
            Some(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_parameter_port() {
        let param = Parameter::PortDefinition(PortDefinition::output(2, PortDomain::Video));
        assert_eq!(param.port(), 2);
        let param = Parameter::BufferSupplier {
            port: 1,
            supplier: BufferSupplier::Input,
        };
        assert_eq!(param.port(), 1);
    }
}
