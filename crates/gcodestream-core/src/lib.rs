//! # gcodestream core
//!
//! Shared types for the G-code streamer: the session data model, the error
//! taxonomy, session events and a small G-code word reader.

pub mod core;
pub mod data;
pub mod error;
pub mod gcode;
pub mod types;

pub use core::{EventDispatcher, StreamEvent};

pub use data::{
    CommandedPosition, ConnectionState, ResponseLogEntry, SessionId, StatusSnapshot,
    StreamingState,
};

pub use error::{Error, Result, StreamError, TransportError};

pub use types::{
    thread_safe, thread_safe_none, thread_safe_vec, ThreadSafe, ThreadSafeOption, ThreadSafeVec,
};
