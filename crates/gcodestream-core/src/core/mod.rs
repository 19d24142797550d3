//! Session-level plumbing shared by every crate

pub mod event;

pub use event::{EventDispatcher, StreamEvent};
