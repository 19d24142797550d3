//! # gcodestream
//!
//! Flow-controlled G-code streaming to 3D printers and plotters over serial
//! links. The workspace is split into:
//!
//! 1. **gcodestream-core** - Session data model, errors, events, G-code word reader
//! 2. **gcodestream-communication** - Transports, line protocol, flow-control window, controller
//! 3. **gcodestream-settings** - Persisted connection and streaming settings
//! 4. **gcodestream** - The command-line sender built on the crates above

use anyhow::{anyhow, Context};
use std::path::Path;

pub use gcodestream_communication::{
    list_ports, FlowControlMode, SerialPortInfo, StreamerConfig, StreamingController, Transport,
    TransportKind, TransportOptions,
};
pub use gcodestream_core::{
    ConnectionState, Error, Result, StatusSnapshot, StreamEvent, StreamingState,
};
pub use gcodestream_settings::{default_config_path, Config, ConnectionSettings, StreamingSettings};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Honours `RUST_LOG` and defaults to `info`. Output goes to stderr so stdout
/// carries only program output; `json` switches to one JSON object per line.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    };

    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

/// Read a G-code file into one command per line
///
/// Lines are kept verbatim apart from the line ending; comments and blank
/// lines are dropped at transmit time.
pub fn load_program(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect())
}

/// The configured port, or the first detected device when set to `auto`
pub fn resolve_port(connection: &ConnectionSettings) -> anyhow::Result<String> {
    if !connection.is_auto_port() {
        return Ok(connection.port.clone());
    }

    let ports = list_ports().context("Failed to detect serial ports")?;
    let first = ports
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No serial devices found; pass --port"))?;
    tracing::info!("Using detected port {}", first.port_name);
    Ok(first.port_name)
}
