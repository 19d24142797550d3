//! Event system for streaming sessions
//!
//! Provides:
//! - Event types for connection, playback and device responses
//! - Event dispatcher for publishing events to subscribers

use crate::data::{ConnectionState, StreamingState};
use tokio::sync::broadcast;

/// Streaming session event types
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connection state changed
    ConnectionChanged(ConnectionState),
    /// Playback state changed
    StreamingChanged(StreamingState),
    /// A line was written to the device
    LineSent {
        /// Index in the program, `None` for manual commands
        index: Option<usize>,
        /// The exact text written, without terminator
        line: String,
    },
    /// The device acknowledged the oldest outstanding line
    Acknowledged,
    /// The device printed its start/ready banner
    DeviceReady(String),
    /// The device reported an error
    DeviceError(String),
    /// The device asked for retransmission
    ResendRequested {
        /// Program index streaming resumes from
        index: usize,
        /// Consecutive requests for the same target
        count: u32,
    },
    /// Repeated identical resend targets crossed the desync threshold
    ProtocolDesync {
        /// The repeated target
        line: u64,
        /// Consecutive requests for it
        count: u32,
    },
    /// Informational device output
    Info(String),
    /// Writing to the transport failed; streaming was paused
    WriteFailed(String),
    /// A local failure stopped streaming or dropped a command
    Fault(String),
    /// No acknowledgement arrived within the stall timeout
    Stalled,
    /// Every program line was handed to the device
    Completed,
}

impl std::fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamEvent::ConnectionChanged(state) => write!(f, "Connection: {}", state),
            StreamEvent::StreamingChanged(state) => write!(f, "Streaming: {}", state),
            StreamEvent::LineSent {
                index: Some(index),
                line,
            } => write!(f, "Sent [{}]: {}", index, line),
            StreamEvent::LineSent { index: None, line } => write!(f, "Sent: {}", line),
            StreamEvent::Acknowledged => write!(f, "ok"),
            StreamEvent::DeviceReady(banner) => write!(f, "Device ready: {}", banner),
            StreamEvent::DeviceError(msg) => write!(f, "Device error: {}", msg),
            StreamEvent::ResendRequested { index, count } => {
                write!(f, "Resend from line {} (attempt {})", index, count)
            }
            StreamEvent::ProtocolDesync { line, count } => {
                write!(f, "Protocol desync: line {} requested {} times", line, count)
            }
            StreamEvent::Info(msg) => write!(f, "{}", msg),
            StreamEvent::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StreamEvent::Fault(msg) => write!(f, "Fault: {}", msg),
            StreamEvent::Stalled => write!(f, "Stalled: no acknowledgement from device"),
            StreamEvent::Completed => write!(f, "Complete"),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 100)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of receivers; zero subscribers is not an error.
    pub fn publish(&self, event: StreamEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
