//! Streaming controller configuration

use crate::streaming::window::DEFAULT_RECEIVE_BUFFER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the transmit loop is throttled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowControlMode {
    /// Gate every buffered line on the receive-buffer window
    #[default]
    Windowed,
    /// Send without accounting, trusting the device's own queue
    Unthrottled,
    /// Windowed unless the transport reports unreliable acknowledgements
    Auto,
}

impl FlowControlMode {
    /// Resolve `Auto` against the transport's ack reliability
    pub fn resolve(self, reliable_acks: bool) -> FlowControlMode {
        match self {
            FlowControlMode::Auto if reliable_acks => FlowControlMode::Windowed,
            FlowControlMode::Auto => FlowControlMode::Unthrottled,
            other => other,
        }
    }
}

impl fmt::Display for FlowControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windowed => write!(f, "windowed"),
            Self::Unthrottled => write!(f, "unthrottled"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Configuration for a [`StreamingController`](crate::StreamingController)
#[derive(Debug, Clone, PartialEq)]
pub struct StreamerConfig {
    /// Device receive buffer in bytes
    pub receive_buffer_size: usize,
    /// Prefix buffered lines with `N<seq>` and append a checksum
    pub line_numbers: bool,
    /// Throttling strategy
    pub flow_control: FlowControlMode,
    /// Pause between lines when unthrottled
    pub unthrottled_line_delay: Duration,
    /// Wait after opening the port for the device's reset pulse to pass
    pub settle_delay: Duration,
    /// Send `M115` once connected
    pub query_firmware_on_connect: bool,
    /// Entries kept in the diagnostic response log
    pub response_log_size: usize,
    /// Consecutive identical resend targets reported as desync; 0 disables
    pub desync_threshold: u32,
    /// Streaming with no acknowledgement for this long is reported as stalled
    pub stall_timeout: Duration,
    /// Broadcast channel capacity for session events
    pub event_buffer: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER,
            line_numbers: false,
            flow_control: FlowControlMode::Windowed,
            unthrottled_line_delay: Duration::ZERO,
            settle_delay: Duration::from_millis(2000),
            query_firmware_on_connect: true,
            response_log_size: 200,
            desync_threshold: 5,
            stall_timeout: Duration::from_secs(30),
            event_buffer: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_resolution() {
        assert_eq!(FlowControlMode::Auto.resolve(true), FlowControlMode::Windowed);
        assert_eq!(
            FlowControlMode::Auto.resolve(false),
            FlowControlMode::Unthrottled
        );
        assert_eq!(
            FlowControlMode::Windowed.resolve(false),
            FlowControlMode::Windowed
        );
    }

    #[test]
    fn test_defaults() {
        let config = StreamerConfig::default();
        assert_eq!(config.receive_buffer_size, 127);
        assert_eq!(config.flow_control, FlowControlMode::Windowed);
        assert!(!config.line_numbers);
    }
}
