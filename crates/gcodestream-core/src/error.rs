//! Error handling for gcodestream
//!
//! Provides error types for each layer of the streaming stack:
//! - Transport errors (port lifecycle, configuration, write timeouts)
//! - Stream errors (session state, device-reported failures, desync)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Transport error type
///
/// Port-level failures. These are surfaced to the caller immediately and are
/// never retried by the transport itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The device node does not exist or could not be opened
    #[error("Port unavailable: {port}: {reason}")]
    PortUnavailable {
        /// The port or device path that was requested.
        port: String,
        /// The reason reported by the operating system.
        reason: String,
    },

    /// The line settings (baud, framing) were rejected by the driver
    #[error("Port configuration rejected: {reason}")]
    ConfigurationError {
        /// The reason the configuration was rejected.
        reason: String,
    },

    /// A write could not complete within the configured timeout
    #[error("Write timed out after {timeout_ms}ms")]
    WriteTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// An operation was attempted on a transport that is not open
    #[error("Transport is not open")]
    NotOpen,

    /// I/O failure while talking to an open port
    #[error("I/O error: {reason}")]
    Io {
        /// The underlying I/O error text.
        reason: String,
    },
}

impl TransportError {
    /// Map an I/O error raised while writing, turning timeouts into `WriteTimeout`
    pub fn from_write_error(err: &std::io::Error, timeout_ms: u64) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportError::WriteTimeout { timeout_ms }
            }
            _ => TransportError::Io {
                reason: err.to_string(),
            },
        }
    }
}

/// Stream error type
///
/// Errors raised by the streaming controller and the device protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The session has no open transport
    #[error("Not connected")]
    NotConnected,

    /// Connect was requested while a session is already open
    #[error("Already connected")]
    AlreadyConnected,

    /// Play was requested without a command list
    #[error("No commands loaded")]
    NothingToStream,

    /// The device reported an error line
    #[error("Device error: {0}")]
    DeviceError(String),

    /// The device asked for a retransmission starting at the given line
    #[error("Resend requested from line {0}")]
    ResendRequested(u64),

    /// The device keeps asking for the same line; window or checksum accounting has drifted
    #[error("Protocol desync: line {line} requested {count} times in a row")]
    ProtocolDesync {
        /// The repeated resend target.
        line: u64,
        /// How many consecutive requests named it.
        count: u32,
    },

    /// A buffered line can never fit in the device receive buffer
    #[error("Line {index} is {bytes} bytes, device buffer holds {capacity}")]
    LineExceedsBuffer {
        /// Index of the offending command.
        index: usize,
        /// Wire length of the formatted line.
        bytes: usize,
        /// Configured receive buffer capacity.
        capacity: usize,
    },
}

/// Main error type for gcodestream
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Stream error
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Port-level failures force a disconnect and are not retried
    pub fn is_port_error(&self) -> bool {
        matches!(
            self,
            Error::Transport(
                TransportError::PortUnavailable { .. }
                    | TransportError::ConfigurationError { .. }
                    | TransportError::WriteTimeout { .. }
            )
        )
    }

    /// Check if this is a write timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(TransportError::WriteTimeout { .. }))
    }

    /// Check if this is a stream error
    pub fn is_stream_error(&self) -> bool {
        matches!(self, Error::Stream(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::PortUnavailable {
            port: "/dev/ttyUSB0".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Port unavailable: /dev/ttyUSB0: No such file or directory"
        );

        let err = TransportError::WriteTimeout { timeout_ms: 1000 };
        assert_eq!(err.to_string(), "Write timed out after 1000ms");
    }

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::ProtocolDesync { line: 4, count: 5 };
        assert_eq!(
            err.to_string(),
            "Protocol desync: line 4 requested 5 times in a row"
        );

        let err = StreamError::LineExceedsBuffer {
            index: 3,
            bytes: 140,
            capacity: 127,
        };
        assert_eq!(
            err.to_string(),
            "Line 3 is 140 bytes, device buffer holds 127"
        );
    }

    #[test]
    fn test_write_error_mapping() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert_eq!(
            TransportError::from_write_error(&timed_out, 250),
            TransportError::WriteTimeout { timeout_ms: 250 }
        );

        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(
            TransportError::from_write_error(&broken, 250),
            TransportError::Io { .. }
        ));
    }

    #[test]
    fn test_error_classification() {
        let err: Error = TransportError::WriteTimeout { timeout_ms: 10 }.into();
        assert!(err.is_port_error());
        assert!(err.is_timeout());

        let err: Error = TransportError::NotOpen.into();
        assert!(!err.is_port_error());

        let err: Error = StreamError::DeviceError("Error:Printer halted".to_string()).into();
        assert!(err.is_stream_error());
        assert!(!err.is_port_error());
    }
}
