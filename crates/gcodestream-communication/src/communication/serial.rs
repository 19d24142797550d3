//! Serial port transport on the native serial API
//!
//! Provides:
//! - Port enumeration with USB metadata
//! - 8N1 configuration without flow control
//! - A reader thread that reassembles lines and feeds the registered callback
//! - Bounded writes that fail with `WriteTimeout`

use super::{terminate_line, LineBuffer, LineCallback, Transport};
use gcodestream_core::{
    thread_safe, thread_safe_none, Error, Result, ThreadSafe, ThreadSafeOption, TransportError,
};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Prusa Research Original Prusa i3")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

impl From<&serialport::SerialPortInfo> for SerialPortInfo {
    fn from(port: &serialport::SerialPortInfo) -> Self {
        let info = SerialPortInfo::new(&port.port_name, port_description(port));
        match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                let mut info = info.with_usb_ids(usb.vid, usb.pid);
                if let Some(ref mfg) = usb.manufacturer {
                    info = info.with_manufacturer(mfg);
                }
                if let Some(ref serial) = usb.serial_number {
                    info = info.with_serial_number(serial);
                }
                info
            }
            _ => info,
        }
    }
}

/// List serial ports that look like printer/plotter controllers
///
/// Ordering is deterministic: `ttyACM*` first (native USB boards), then
/// `ttyUSB*` (USB-serial bridges), then everything else by name.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        Error::other(format!("Failed to enumerate ports: {}", e))
    })?;

    let mut infos: Vec<SerialPortInfo> = ports
        .iter()
        .filter(|port| is_candidate_port(&port.port_name))
        .map(SerialPortInfo::from)
        .collect();
    infos.sort_by_key(|info| port_sort_key(&info.port_name));
    infos.dedup_by(|a, b| a.port_name == b.port_name);
    Ok(infos)
}

/// Check if a port name matches the patterns USB controller boards enumerate as
fn is_candidate_port(port_name: &str) -> bool {
    if let Some(num) = port_name.strip_prefix("COM") {
        return !num.is_empty() && num.chars().all(|c| c.is_ascii_digit());
    }

    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial")
        || port_name.starts_with("/dev/cu.usbmodem")
        || port_name.starts_with("/dev/tty.usbserial")
        || port_name.starts_with("/dev/tty.usbmodem")
}

fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        return (0, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        return (1, rest.parse().unwrap_or(usize::MAX), basename.to_string());
    }
    (2, 0, basename.to_string())
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Map an open/configure failure onto the transport taxonomy
fn map_open_error(port: &str, err: serialport::Error) -> TransportError {
    match err.kind {
        serialport::ErrorKind::InvalidInput => TransportError::ConfigurationError {
            reason: err.description,
        },
        _ => TransportError::PortUnavailable {
            port: port.to_string(),
            reason: err.description,
        },
    }
}

struct OpenPort {
    name: String,
    writer: Box<dyn serialport::SerialPort>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// Transport over the `serialport` crate
pub struct SerialTransport {
    write_timeout: Duration,
    read_timeout: Duration,
    port: Mutex<Option<OpenPort>>,
    callback: ThreadSafeOption<LineCallback>,
    line_buffer: ThreadSafe<LineBuffer>,
}

impl SerialTransport {
    /// Create a closed transport
    pub fn new(write_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            write_timeout,
            read_timeout,
            port: Mutex::new(None),
            callback: thread_safe_none(),
            line_buffer: thread_safe(LineBuffer::new()),
        }
    }

    fn write_timeout_ms(&self) -> u64 {
        self.write_timeout.as_millis() as u64
    }

    fn spawn_reader(
        &self,
        name: &str,
        mut reader: Box<dyn serialport::SerialPort>,
        running: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        let callback = self.callback.clone();
        let line_buffer = self.line_buffer.clone();
        let port_name = name.to_string();

        std::thread::Builder::new()
            .name("gcodestream-serial-rx".to_string())
            .spawn(move || {
                let mut buf = [0u8; 256];
                while running.load(Ordering::Acquire) {
                    match reader.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => {
                            let lines = line_buffer.lock().push(&buf[..n]);
                            if lines.is_empty() {
                                continue;
                            }
                            let cb = callback.lock().clone();
                            if let Some(cb) = cb {
                                for line in &lines {
                                    tracing::trace!(port = %port_name, "<< {}", line);
                                    cb(line);
                                }
                            }
                        }
                        Err(e)
                            if e.kind() == io::ErrorKind::TimedOut
                                || e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::Interrupted =>
                        {
                            continue
                        }
                        Err(e) => {
                            if running.load(Ordering::Acquire) {
                                tracing::error!(port = %port_name, "Serial read failed: {}", e);
                            }
                            break;
                        }
                    }
                }
                tracing::debug!(port = %port_name, "Serial reader stopped");
            })
    }
}

impl Transport for SerialTransport {
    fn open(&self, address: &str, baud_rate: u32) -> std::result::Result<(), TransportError> {
        let mut guard = self.port.lock();
        if guard.is_some() {
            return Err(TransportError::ConfigurationError {
                reason: format!("{} is already open", address),
            });
        }

        let writer = serialport::new(address, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.write_timeout)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", address, e);
                map_open_error(address, e)
            })?;

        let mut reader = writer
            .try_clone()
            .map_err(|e| map_open_error(address, e))?;
        reader
            .set_timeout(self.read_timeout)
            .map_err(|e| map_open_error(address, e))?;

        self.line_buffer.lock().clear();
        let running = Arc::new(AtomicBool::new(true));
        let handle = self
            .spawn_reader(address, reader, running.clone())
            .map_err(|e| TransportError::Io {
                reason: e.to_string(),
            })?;

        tracing::info!("Opened serial port {} at {} baud", address, baud_rate);
        *guard = Some(OpenPort {
            name: address.to_string(),
            writer,
            running,
            reader: Some(handle),
        });
        Ok(())
    }

    fn close(&self) -> std::result::Result<(), TransportError> {
        let Some(mut port) = self.port.lock().take() else {
            return Ok(());
        };
        port.running.store(false, Ordering::Release);
        if let Some(handle) = port.reader.take() {
            if handle.join().is_err() {
                tracing::warn!("Serial reader for {} panicked", port.name);
            }
        }
        self.line_buffer.lock().clear();
        tracing::info!("Closed serial port {}", port.name);
        Ok(())
    }

    fn write_line(&self, text: &str) -> std::result::Result<usize, TransportError> {
        let line = terminate_line(text);
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;

        port.writer
            .write_all(line.as_bytes())
            .and_then(|_| port.writer.flush())
            .map_err(|e| {
                tracing::error!("Write to {} failed: {}", port.name, e);
                TransportError::from_write_error(&e, self.write_timeout_ms())
            })?;

        tracing::trace!(port = %port.name, ">> {}", line.trim_end());
        Ok(line.len())
    }

    fn on_line_received(&self, callback: LineCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn clear_buffers(&self) -> std::result::Result<(), TransportError> {
        self.line_buffer.lock().clear();
        let guard = self.port.lock();
        let port = guard.as_ref().ok_or(TransportError::NotOpen)?;
        port.writer
            .clear(serialport::ClearBuffer::All)
            .map_err(|e| TransportError::Io {
                reason: e.description,
            })
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    fn name(&self) -> &'static str {
        "serial"
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
