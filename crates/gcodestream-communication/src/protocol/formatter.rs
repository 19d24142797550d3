//! Outgoing line formatting
//!
//! Sequenced lines look like `N<seq> <command> *<checksum>`; the checksum is the
//! XOR of every byte of `N<seq> <command>`, XORed with 32, printed in decimal.
//! Comments are never transmitted.

use crate::communication::LINE_TERMINATOR;
use gcodestream_core::gcode;

/// Commands the firmware handles out of band; they take no receive-buffer space
///
/// Temperature report, set/wait temperature and fan control.
pub const NON_BUFFERED_COMMANDS: &[&str] =
    &["M104", "M105", "M106", "M107", "M109", "M140", "M190"];

/// Whether a command occupies space in the device receive buffer
pub fn is_buffered(command: &str) -> bool {
    match gcode::command_code(command) {
        Some(code) => !NON_BUFFERED_COMMANDS.contains(&code.as_str()),
        None => true,
    }
}

/// XOR of every byte, then XOR 32
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0u8, |acc, b| acc ^ b) ^ 32
}

/// A command ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedLine {
    /// Line text without terminator
    pub text: String,
    /// Occupies device buffer space
    pub buffered: bool,
    /// Sequence number carried by the line, if any
    pub sequence: Option<u64>,
}

impl FormattedLine {
    /// Exact byte count on the wire, terminator included
    pub fn wire_len(&self) -> usize {
        self.text.len() + LINE_TERMINATOR.len()
    }

    /// Bytes charged against the flow-control window
    pub fn window_bytes(&self) -> usize {
        if self.buffered {
            self.wire_len()
        } else {
            0
        }
    }

    /// The full wire form, terminator included
    pub fn to_wire(&self) -> String {
        format!("{}{}", self.text, LINE_TERMINATOR)
    }
}

/// Format a command; `None` when nothing is left after stripping the comment
///
/// Only buffered commands consume `sequence` when `use_sequence` is set.
pub fn format_line(command: &str, sequence: u64, use_sequence: bool) -> Option<FormattedLine> {
    let body = gcode::strip_comment(command);
    if body.is_empty() {
        return None;
    }

    let buffered = is_buffered(body);
    if use_sequence && buffered {
        let payload = format!("N{} {}", sequence, body);
        let sum = checksum(&payload);
        Some(FormattedLine {
            text: format!("{} *{}", payload, sum),
            buffered,
            sequence: Some(sequence),
        })
    } else {
        Some(FormattedLine {
            text: body.to_string(),
            buffered,
            sequence: None,
        })
    }
}

/// Exact bytes to send for `command`, or an empty string for a comment-only line
pub fn format(command: &str, sequence: u64, use_sequence: bool) -> String {
    format_line(command, sequence, use_sequence)
        .map(|line| line.to_wire())
        .unwrap_or_default()
}
