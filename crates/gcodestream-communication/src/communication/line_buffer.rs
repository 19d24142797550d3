//! Reassembly of received bytes into lines
//!
//! Reads arrive in arbitrary chunks. Bytes are held until a `\n` shows up,
//! then the line is decoded and trimmed. A trailing `\r` disappears with the
//! trim, so both `\n` and `\r\n` devices work. Blank lines are dropped.

/// Accumulates partial reads and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let text = String::from_utf8_lossy(&self.pending);
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
                self.pending.clear();
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Discard any partial line
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of bytes waiting for a terminator
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
