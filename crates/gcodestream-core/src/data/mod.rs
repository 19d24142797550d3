//! Data models for session state and status reporting
//!
//! This module provides:
//! - Connection and streaming state machines
//! - Commanded position tracking (XYZ extracted from sent lines)
//! - The status snapshot exposed to callers
//! - Timestamped response log entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier attached to one connect/disconnect cycle, recorded in log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random session id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// State of the link to the device
///
/// Transitions only happen through explicit connect/disconnect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No transport open
    #[default]
    Disconnected,
    /// Opening the transport and waiting for the device to settle
    Connecting,
    /// Transport open, reader and transmit loop running
    Connected,
    /// The last connect attempt failed
    Failed,
}

impl ConnectionState {
    /// Check if this state has an open transport
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if a transition from this state to `target` is valid.
    ///
    /// - Disconnected/Failed → Connecting
    /// - Connecting → Connected, Failed
    /// - any state → Disconnected
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        if *self == target {
            return true;
        }
        matches!(
            (self, target),
            (Disconnected | Failed, Connecting)
                | (Connecting, Connected | Failed)
                | (_, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// State of program playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StreamingState {
    /// Nothing loaded, or the session was torn down
    #[default]
    Idle,
    /// The transmit loop is draining the command list
    Streaming,
    /// No new lines are sent; position and window are preserved
    Paused,
    /// Position reached the end of the list
    Complete,
}

impl StreamingState {
    /// Check if the transmit loop may pick the next program line
    pub fn is_active(&self) -> bool {
        matches!(self, StreamingState::Streaming)
    }
}

impl fmt::Display for StreamingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Paused => write!(f, "Paused"),
            Self::Complete => write!(f, "Complete"),
        }
    }
}

/// Last commanded tool position, built from the axis words of sent lines
///
/// Axes that were never mentioned stay `None`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandedPosition {
    /// X-axis target
    pub x: Option<f64>,
    /// Y-axis target
    pub y: Option<f64>,
    /// Z-axis target
    pub z: Option<f64>,
}

impl CommandedPosition {
    /// Merge the axes present in `other` over this position
    pub fn merge(&mut self, other: CommandedPosition) {
        if other.x.is_some() {
            self.x = other.x;
        }
        if other.y.is_some() {
            self.y = other.y;
        }
        if other.z.is_some() {
            self.z = other.z;
        }
    }

    /// Whether no axis has been commanded yet
    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }
}

impl fmt::Display for CommandedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let axis = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.3}", v));
        write!(f, "X:{} Y:{} Z:{}", axis(self.x), axis(self.y), axis(self.z))
    }
}

/// Point-in-time view of a streaming session
///
/// Everything a caller needs to render progress, plus the health signals
/// (stall flag, consecutive resend count) a retry policy can be layered on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Link state
    pub connection_state: ConnectionState,
    /// Playback state
    pub streaming_state: StreamingState,
    /// Index of the next program line to send
    pub position: usize,
    /// Number of lines in the program
    pub total: usize,
    /// Display text of the most recent event
    pub last_event: String,
    /// Bytes sent but not yet acknowledged
    pub bytes_outstanding: usize,
    /// Configured device receive buffer size
    pub buffer_capacity: usize,
    /// The device announced itself with a start/ready banner
    pub device_ready: bool,
    /// Most recent error line reported by the device
    pub last_device_error: Option<String>,
    /// Consecutive resend requests naming the same line
    pub consecutive_resends: u32,
    /// Streaming with bytes outstanding and no acknowledgement for too long
    pub stalled: bool,
    /// Last commanded XYZ from the lines sent so far
    pub commanded_position: CommandedPosition,
}

impl StatusSnapshot {
    /// Fraction of the program already handed to the device, 0.0..=1.0
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.position.min(self.total) as f64) / (self.total as f64)
        }
    }

    /// Get buffer usage as a percentage (0-100)
    pub fn buffer_percentage(&self) -> f64 {
        if self.buffer_capacity == 0 {
            0.0
        } else {
            (self.bytes_outstanding as f64 / self.buffer_capacity as f64) * 100.0
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            streaming_state: StreamingState::Idle,
            position: 0,
            total: 0,
            last_event: String::new(),
            bytes_outstanding: 0,
            buffer_capacity: 0,
            device_ready: false,
            last_device_error: None,
            consecutive_resends: 0,
            stalled: false,
            commanded_position: CommandedPosition::default(),
        }
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {}/{} | buffer {}/{}",
            self.connection_state,
            self.streaming_state,
            self.position,
            self.total,
            self.bytes_outstanding,
            self.buffer_capacity
        )?;
        if self.stalled {
            write!(f, " | stalled")?;
        }
        if !self.last_event.is_empty() {
            write!(f, " | {}", self.last_event)?;
        }
        Ok(())
    }
}

/// A device line kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseLogEntry {
    /// When the line was received
    pub received_at: DateTime<Utc>,
    /// The trimmed line text
    pub text: String,
}

impl ResponseLogEntry {
    /// Stamp a line with the current time
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            received_at: Utc::now(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_transitions() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Connecting));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
    }

    #[test]
    fn test_commanded_position_merge() {
        let mut pos = CommandedPosition::default();
        assert!(pos.is_empty());

        pos.merge(CommandedPosition {
            x: Some(10.0),
            y: Some(20.0),
            z: None,
        });
        pos.merge(CommandedPosition {
            x: None,
            y: None,
            z: Some(0.2),
        });

        assert_eq!(pos.x, Some(10.0));
        assert_eq!(pos.y, Some(20.0));
        assert_eq!(pos.z, Some(0.2));
        assert_eq!(pos.to_string(), "X:10.000 Y:20.000 Z:0.200");
    }

    #[test]
    fn test_status_progress() {
        let status = StatusSnapshot {
            position: 3,
            total: 4,
            bytes_outstanding: 32,
            buffer_capacity: 128,
            ..Default::default()
        };
        assert!((status.progress() - 0.75).abs() < f64::EPSILON);
        assert!((status.buffer_percentage() - 25.0).abs() < f64::EPSILON);

        assert_eq!(StatusSnapshot::default().progress(), 0.0);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 32);
    }

    #[test]
    fn test_status_serializes_to_json() {
        let status = StatusSnapshot {
            connection_state: ConnectionState::Connected,
            streaming_state: StreamingState::Streaming,
            total: 3,
            ..Default::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"streaming_state\":\"Streaming\""));
        let back: StatusSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_status_display() {
        let status = StatusSnapshot {
            connection_state: ConnectionState::Connected,
            streaming_state: StreamingState::Paused,
            position: 2,
            total: 5,
            buffer_capacity: 127,
            stalled: true,
            last_event: "Paused".to_string(),
            ..Default::default()
        };
        assert_eq!(
            status.to_string(),
            "Connected | Paused | 2/5 | buffer 0/127 | stalled | Paused"
        );
    }
}
