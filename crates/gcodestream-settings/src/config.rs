//! Configuration for gcodestream
//!
//! Supports JSON and TOML files, chosen by extension. Configuration is
//! organized into two sections:
//! - Connection settings (port, baud rate, transport, timeouts)
//! - Streaming settings (receive buffer, sequencing, flow control, diagnostics)
//!
//! Missing keys fall back to their defaults, so a file only needs to name what
//! it changes.

use crate::error::{SettingsError, SettingsResult};
use gcodestream_communication::{FlowControlMode, StreamerConfig, TransportKind, TransportOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Port name that asks for the first detected device
pub const AUTO_PORT: &str = "auto";

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Device path, or `auto` for the first detected port
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Transport implementation
    pub transport: TransportKind,
    /// Wait after opening for the device's power-on reset
    pub settle_ms: u64,
    /// Upper bound for one line write
    pub write_timeout_ms: u64,
    /// Reader poll interval
    pub read_timeout_ms: u64,
    /// Send `M115` once connected
    pub query_firmware_on_connect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: AUTO_PORT.to_string(),
            baud_rate: 115200,
            transport: TransportKind::Auto,
            settle_ms: 2000,
            write_timeout_ms: 1000,
            read_timeout_ms: 100,
            query_firmware_on_connect: true,
        }
    }
}

impl ConnectionSettings {
    /// Whether the port should be picked from the detected devices
    pub fn is_auto_port(&self) -> bool {
        self.port.trim().is_empty() || self.port.eq_ignore_ascii_case(AUTO_PORT)
    }

    /// Transport selection and timeouts
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            kind: self.transport,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }
}

/// Streaming settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Device receive buffer in bytes
    pub receive_buffer_size: usize,
    /// Send `N<seq> ... *<checksum>` lines
    pub line_numbers: bool,
    /// Throttling strategy
    pub flow_control: FlowControlMode,
    /// Pause between lines when unthrottled
    pub unthrottled_line_delay_ms: u64,
    /// Entries kept in the response log
    pub response_log_size: usize,
    /// Repeated resend count reported as desync; 0 disables
    pub desync_threshold: u32,
    /// Silence while streaming before reporting a stall
    pub stall_timeout_ms: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        let defaults = StreamerConfig::default();
        Self {
            receive_buffer_size: defaults.receive_buffer_size,
            line_numbers: defaults.line_numbers,
            flow_control: defaults.flow_control,
            unthrottled_line_delay_ms: 0,
            response_log_size: defaults.response_log_size,
            desync_threshold: defaults.desync_threshold,
            stall_timeout_ms: 30_000,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Streaming settings
    pub streaming: StreamingSettings,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Format::Json),
        Some(ext) if ext.eq_ignore_ascii_case("toml") => Ok(Format::Toml),
        other => Err(SettingsError::UnsupportedFormat(
            other.unwrap_or("none").to_string(),
        )),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from a `.json` or `.toml` file
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists, otherwise the defaults
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to a `.json` or `.toml` file, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::info!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let connection = &self.connection;
        if connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        if connection.write_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.write_timeout_ms",
                "must be > 0",
            ));
        }
        if connection.read_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "connection.read_timeout_ms",
                "must be > 0",
            ));
        }

        let streaming = &self.streaming;
        if streaming.receive_buffer_size == 0 {
            return Err(SettingsError::invalid(
                "streaming.receive_buffer_size",
                "must be > 0",
            ));
        }
        if streaming.stall_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "streaming.stall_timeout_ms",
                "must be > 0",
            ));
        }

        Ok(())
    }

    /// Controller configuration built from both sections
    pub fn streamer_config(&self) -> StreamerConfig {
        StreamerConfig {
            receive_buffer_size: self.streaming.receive_buffer_size,
            line_numbers: self.streaming.line_numbers,
            flow_control: self.streaming.flow_control,
            unthrottled_line_delay: Duration::from_millis(self.streaming.unthrottled_line_delay_ms),
            settle_delay: Duration::from_millis(self.connection.settle_ms),
            query_firmware_on_connect: self.connection.query_firmware_on_connect,
            response_log_size: self.streaming.response_log_size,
            desync_threshold: self.streaming.desync_threshold,
            stall_timeout: Duration::from_millis(self.streaming.stall_timeout_ms),
            ..StreamerConfig::default()
        }
    }
}

/// `<config dir>/gcodestream/config.toml`, falling back to the working directory
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gcodestream")
        .join("config.toml")
}
