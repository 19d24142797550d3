//! # gcodestream communication
//!
//! Everything between a command list and the wire: serial transports, the
//! Marlin-style line protocol, the flow-control window and the streaming
//! controller that ties them together.

pub mod communication;
pub mod protocol;
pub mod streaming;

pub use communication::{
    create_transport, list_ports, terminate_line, LineBuffer, LineCallback, SerialPortInfo,
    SerialTransport, Transport, TransportKind, TransportOptions, LINE_TERMINATOR,
};

#[cfg(unix)]
pub use communication::FdTransport;

pub use protocol::{classify, format, format_line, is_buffered, FormattedLine, Response};

pub use streaming::{
    FlowControlMode, FlowWindow, PendingAck, StreamerConfig, StreamingController,
    DEFAULT_RECEIVE_BUFFER,
};
