//! gcodestream settings
//!
//! Persisted connection and streaming preferences, stored as JSON or TOML in
//! the platform config directory.

pub mod config;
pub mod error;

pub use config::{default_config_path, Config, ConnectionSettings, StreamingSettings};
pub use error::{SettingsError, SettingsResult};
