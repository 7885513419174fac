//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module handles:
//!
//! - Reading the JSON configuration file from the platform-appropriate
//!   directory, or from an explicit path given on the command line.
//! - Falling back to defaults section by section and reporting each fallback
//!   as a named warning.
//! - Writing the current routing, labels and settings back on shutdown.

pub mod config;

pub use config::{ConfigError, ConfigWarning, LoadedConfig, MatrixConfig, SerialConfig};
