//! Scripted in-memory device for controller tests

#![allow(dead_code)]

use gcodestream_communication::{LineCallback, StreamerConfig, Transport};
use gcodestream_core::{thread_safe_vec, ThreadSafeVec, TransportError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decides the device's replies to each written line
pub type Script = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// A device that records what it receives and answers from a script
///
/// Replies are delivered synchronously from `write_line`, the way a fast
/// device answering within the same read cycle would look to the reader.
pub struct SimulatedDevice {
    sent: ThreadSafeVec<String>,
    callback: Mutex<Option<LineCallback>>,
    script: Mutex<Script>,
    open: AtomicBool,
    fail_open: AtomicBool,
    fail_writes: AtomicBool,
}

impl SimulatedDevice {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            sent: thread_safe_vec(),
            callback: Mutex::new(None),
            script: Mutex::new(script),
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        })
    }

    /// Acknowledges every line immediately
    pub fn acking() -> Arc<Self> {
        Self::new(Box::new(|_| vec!["ok".to_string()]))
    }

    /// Never answers on its own; use `inject`
    pub fn silent() -> Arc<Self> {
        Self::new(Box::new(|_| Vec::new()))
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Deliver a line as if the device printed it
    pub fn inject(&self, line: &str) {
        let cb = self.callback.lock().clone();
        if let Some(cb) = cb {
            cb(line);
        }
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Transport for SimulatedDevice {
    fn open(&self, address: &str, _baud_rate: u32) -> Result<(), TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::PortUnavailable {
                port: address.to_string(),
                reason: "No such file or directory".to_string(),
            });
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn write_line(&self, text: &str) -> Result<usize, TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::WriteTimeout { timeout_ms: 10 });
        }
        let line = text.trim_end_matches(['\r', '\n']).to_string();
        self.sent.lock().push(line.clone());

        let replies = {
            let mut script = self.script.lock();
            (*script)(&line)
        };
        for reply in replies {
            self.inject(&reply);
        }
        Ok(line.len() + 2)
    }

    fn on_line_received(&self, callback: LineCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn clear_buffers(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Config without settle delay or firmware query, so tests see only their lines
pub fn test_config() -> StreamerConfig {
    StreamerConfig {
        settle_delay: Duration::ZERO,
        query_firmware_on_connect: false,
        ..Default::default()
    }
}

/// Poll `condition` until it holds or two seconds pass
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
