//! Marlin-style line protocol
//!
//! - [`formatter`]: outgoing lines, sequence numbers and checksums
//! - [`classifier`]: incoming line classification

pub mod classifier;
pub mod formatter;

pub use classifier::{classify, Response};
pub use formatter::{checksum, format, format_line, is_buffered, FormattedLine};
