//! # replay-config: Server and Table Configuration
//!
//! Loads the hosting process configuration from layered sources with
//! priority:
//! 1. Default values
//! 2. Configuration files
//! 3. Environment variables (highest priority)
//!
//! A loaded [`TableConfig`] builds a ready `replay_core::Table`.

#![warn(missing_docs)]

mod loader;
mod table;

pub use loader::{ConfigLoader, ServerConfig};
pub use table::{CheckpointConfig, RateLimiterConfig, SelectorConfig, TableConfig};

use thiserror::Error;

/// Result type for replay-config operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Parse error in a configuration file
    #[error("parse error: {0}")]
    Parse(String),

    /// A field holds an invalid value
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Offending field
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// Environment variable error
    #[error("environment error: {0}")]
    EnvVar(String),

    /// Table construction failed
    #[error("table build error: {0}")]
    Build(#[from] replay_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
