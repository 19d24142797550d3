//! Flow-controlled program streaming
//!
//! - [`window`]: outstanding-byte accounting against the device buffer
//! - [`config`]: controller configuration
//! - [`controller`]: the session state machine and transmit loop

pub mod config;
pub mod controller;
pub mod window;

pub use config::{FlowControlMode, StreamerConfig};
pub use controller::{StreamingController, FIRMWARE_QUERY, FIRST_SEQUENCE};
pub use window::{FlowWindow, PendingAck, DEFAULT_RECEIVE_BUFFER};
