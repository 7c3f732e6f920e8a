//! Error types for ember operations.
//!
//! Only configuration validation is fatal. Everything else the engine can
//! degrade around: insufficient cohorts fall back, non-finite values are
//! clamped and isolated, budget exhaustion is normal early termination.

use std::error::Error;
use std::fmt;

/// Result type for ember operations.
pub type Result<T> = std::result::Result<T, EmberError>;

/// Errors that can occur during ember operations.
#[derive(Debug, Clone)]
pub enum EmberError {
    /// Configuration errors — fatal at startup only.
    Config(ConfigError),
    /// Graph-related errors.
    Graph(GraphError),
    /// Numeric errors surfaced past the commit-boundary guard.
    Numeric(NumericError),
    /// Serialization errors.
    Serialization(String),
    /// I/O errors (wrapped).
    Io(String),
}

impl fmt::Display for EmberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmberError::Config(e) => write!(f, "Config error: {}", e),
            EmberError::Graph(e) => write!(f, "Graph error: {}", e),
            EmberError::Numeric(e) => write!(f, "Numeric error: {}", e),
            EmberError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            EmberError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl Error for EmberError {}

impl From<std::io::Error> for EmberError {
    fn from(e: std::io::Error) -> Self {
        EmberError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EmberError {
    fn from(e: serde_json::Error) -> Self {
        EmberError::Serialization(e.to_string())
    }
}

/// Configuration errors.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Value outside its admissible range.
    OutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },
    /// Value rejected for a non-range reason.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::OutOfRange {
                field,
                min,
                max,
                value,
            } => {
                write!(f, "{} out of range: {} (must be {}-{})", field, value, min, max)
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(f, "Invalid value for {}: {} ({})", field, value, reason)
            }
        }
    }
}

/// Graph-related errors.
#[derive(Debug, Clone)]
pub enum GraphError {
    /// Node not found.
    NodeNotFound(String),
    /// Link not found.
    LinkNotFound(String),
    /// Link endpoints missing from the store.
    DanglingLink(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::NodeNotFound(id) => write!(f, "Node not found: {}", id),
            GraphError::LinkNotFound(id) => write!(f, "Link not found: {}", id),
            GraphError::DanglingLink(id) => write!(f, "Link references missing node: {}", id),
        }
    }
}

/// Numeric errors.
#[derive(Debug, Clone)]
pub enum NumericError {
    /// A value that must be finite was NaN or infinite.
    NonFinite { what: String },
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericError::NonFinite { what } => write!(f, "Non-finite value in {}", what),
        }
    }
}

// Convenience constructors
impl EmberError {
    pub fn out_of_range(field: impl Into<String>, min: f64, max: f64, value: f64) -> Self {
        EmberError::Config(ConfigError::OutOfRange {
            field: field.into(),
            min,
            max,
            value,
        })
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        EmberError::Config(ConfigError::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        })
    }

    pub fn node_not_found(id: impl Into<String>) -> Self {
        EmberError::Graph(GraphError::NodeNotFound(id.into()))
    }

    pub fn link_not_found(id: impl Into<String>) -> Self {
        EmberError::Graph(GraphError::LinkNotFound(id.into()))
    }

    pub fn non_finite(what: impl Into<String>) -> Self {
        EmberError::Numeric(NumericError::NonFinite { what: what.into() })
    }
}
