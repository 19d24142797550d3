//! Byte-stream transports to the device
//!
//! A [`Transport`] opens a port, writes terminated lines and delivers every
//! complete received line to a registered callback on its own reader thread.
//! Two implementations share the contract:
//! - [`SerialTransport`]: the native serial API via `serialport`
//! - [`FdTransport`]: direct file-descriptor I/O with termios (unix only)
//!
//! [`TransportKind::detect`] picks one at startup.

pub mod line_buffer;
pub mod serial;

#[cfg(unix)]
pub mod fd;

pub use line_buffer::LineBuffer;
pub use serial::{list_ports, SerialPortInfo, SerialTransport};

#[cfg(unix)]
pub use fd::FdTransport;

use gcodestream_core::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Canonical line terminator on the wire
pub const LINE_TERMINATOR: &str = "\r\n";

/// Receives one trimmed line per call, on the transport's reader thread
pub type LineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Port contract shared by every transport implementation
///
/// All methods take `&self`; implementations guard their handles internally so
/// the transmit loop can write while the caller closes from another thread.
pub trait Transport: Send + Sync {
    /// Open and configure the link (8N1, no hardware handshake)
    fn open(&self, address: &str, baud_rate: u32) -> Result<(), TransportError>;

    /// Stop the reader thread and release the port
    fn close(&self) -> Result<(), TransportError>;

    /// Write one line, appending `\r\n` when absent. Returns the bytes written.
    fn write_line(&self, text: &str) -> Result<usize, TransportError>;

    /// Register the listener for received lines, replacing any previous one
    fn on_line_received(&self, callback: LineCallback);

    /// Discard unread input and unsent output
    fn clear_buffers(&self) -> Result<(), TransportError>;

    /// Whether the port is currently open
    fn is_open(&self) -> bool;

    /// Whether acknowledgements arrive reliably through this transport
    ///
    /// Transports that answer `false` are streamed unthrottled when the flow
    /// control mode is `Auto`.
    fn reliable_acks(&self) -> bool {
        true
    }

    /// Short implementation name for logs
    fn name(&self) -> &'static str;
}

/// Append the canonical terminator, replacing a bare `\n` or `\r`
pub fn terminate_line(text: &str) -> String {
    if text.ends_with(LINE_TERMINATOR) {
        return text.to_string();
    }
    let mut line = text.trim_end_matches(['\r', '\n']).to_string();
    line.push_str(LINE_TERMINATOR);
    line
}

/// Which transport implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Pick by platform
    #[default]
    Auto,
    /// Native serial API
    Serial,
    /// Raw file descriptor with termios
    FileDescriptor,
}

impl TransportKind {
    /// Resolve `Auto` to a concrete implementation for this platform
    pub fn detect(self) -> TransportKind {
        match self {
            TransportKind::Auto => {
                if cfg!(target_os = "macos") {
                    TransportKind::FileDescriptor
                } else {
                    TransportKind::Serial
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Serial => write!(f, "serial"),
            Self::FileDescriptor => write!(f, "file_descriptor"),
        }
    }
}

/// Timeouts and selection for building a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Requested implementation
    pub kind: TransportKind,
    /// Upper bound for a single `write_line`
    pub write_timeout: Duration,
    /// Reader poll interval; bounds how long `close` waits for the reader
    pub read_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            kind: TransportKind::Auto,
            write_timeout: Duration::from_millis(1000),
            read_timeout: Duration::from_millis(100),
        }
    }
}

/// Build the transport selected by `options`
pub fn create_transport(options: &TransportOptions) -> Result<Arc<dyn Transport>, TransportError> {
    match options.kind.detect() {
        TransportKind::FileDescriptor => {
            #[cfg(unix)]
            {
                Ok(Arc::new(FdTransport::new(
                    options.write_timeout,
                    options.read_timeout,
                )))
            }
            #[cfg(not(unix))]
            {
                Err(TransportError::ConfigurationError {
                    reason: "file descriptor transport is only available on unix".to_string(),
                })
            }
        }
        _ => Ok(Arc::new(SerialTransport::new(
            options.write_timeout,
            options.read_timeout,
        ))),
    }
}
