//! Flow-control window
//!
//! Tracks bytes sent but not yet acknowledged. Acknowledgements are assumed to
//! arrive in send order, so each `ok` retires the oldest entry. Firmware that
//! reorders or coalesces acks would break that assumption.

use std::collections::VecDeque;

/// Default receive buffer of single-buffer firmware
pub const DEFAULT_RECEIVE_BUFFER: usize = 127;

/// One in-flight line awaiting its acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingAck {
    /// Bytes charged for the line; zero for non-buffered commands
    pub bytes: usize,
}

/// FIFO of outstanding lines gated by the device buffer capacity
#[derive(Debug, Clone)]
pub struct FlowWindow {
    capacity: usize,
    pending: VecDeque<PendingAck>,
    outstanding: usize,
    unthrottled: bool,
}

impl FlowWindow {
    /// Window enforcing `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pending: VecDeque::new(),
            outstanding: 0,
            unthrottled: false,
        }
    }

    /// Window that never blocks and keeps no accounting
    ///
    /// For transports whose acknowledgements cannot be trusted; the device's
    /// own queueing is relied upon instead.
    pub fn unthrottled(capacity: usize) -> Self {
        Self {
            unthrottled: true,
            ..Self::new(capacity)
        }
    }

    /// Whether `next_command_bytes` fit beside what is outstanding
    pub fn can_send(&self, next_command_bytes: usize) -> bool {
        self.unthrottled || self.outstanding + next_command_bytes <= self.capacity
    }

    /// Whether a line of this size could ever be sent
    pub fn fits_at_all(&self, bytes: usize) -> bool {
        self.unthrottled || bytes <= self.capacity
    }

    /// Charge a transmitted line
    pub fn record_sent(&mut self, bytes: usize) {
        if self.unthrottled {
            return;
        }
        self.pending.push_back(PendingAck { bytes });
        self.outstanding += bytes;
    }

    /// Retire the oldest entry; an ack on an empty window is ignored
    pub fn record_acked(&mut self) -> Option<PendingAck> {
        let acked = self.pending.pop_front()?;
        self.outstanding -= acked.bytes;
        Some(acked)
    }

    /// Undo the most recent `record_sent` after a failed write
    pub fn rollback_last(&mut self) -> Option<PendingAck> {
        let last = self.pending.pop_back()?;
        self.outstanding -= last.bytes;
        Some(last)
    }

    /// Drop every outstanding entry
    pub fn reset(&mut self) {
        self.pending.clear();
        self.outstanding = 0;
    }

    /// Sum of outstanding entries
    pub fn bytes_outstanding(&self) -> usize {
        self.outstanding
    }

    /// Number of lines awaiting acknowledgement
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing awaits acknowledgement
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Configured receive buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether accounting is bypassed
    pub fn is_unthrottled(&self) -> bool {
        self.unthrottled
    }
}

impl Default for FlowWindow {
    fn default() -> Self {
        Self::new(DEFAULT_RECEIVE_BUFFER)
    }
}
