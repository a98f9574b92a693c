//! Error types shared across the BrainCar crates
//!
//! Configuration and wire-protocol errors live here because both the
//! producer and the actuator side need them.

use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that was being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML or has the wrong shape
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside its allowed range
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending option
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// ============================================================================
// Protocol Errors
// ============================================================================

/// Errors from parsing wire tokens or sample lines.
///
/// These are always transient: callers log and skip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Line contained no usable content
    #[error("Empty line")]
    Empty,

    /// Line had fewer fields than the configured column
    #[error("Missing column {index}: line has {fields} field(s)")]
    MissingColumn {
        /// Requested column
        index: usize,
        /// Fields actually present
        fields: usize,
    },

    /// Field did not parse as a finite number
    #[error("Invalid sample value {0:?}")]
    InvalidSample(String),
}
