//! Direct file-descriptor transport
//!
//! Opens the device node itself, sets raw 8N1 termios without hardware
//! handshake, and drives both directions with `poll(2)`. Used where the native
//! serial API misbehaves with USB CDC boards (macOS). Acknowledgements through
//! this path have proven unreliable, so it reports `reliable_acks() == false`.

use super::{terminate_line, LineBuffer, LineCallback, Transport};
use gcodestream_core::{
    thread_safe, thread_safe_none, ThreadSafe, ThreadSafeOption, TransportError,
};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct OpenFd {
    name: String,
    file: Arc<File>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// Transport over a raw file descriptor
pub struct FdTransport {
    write_timeout: Duration,
    read_timeout: Duration,
    port: Mutex<Option<OpenFd>>,
    callback: ThreadSafeOption<LineCallback>,
    line_buffer: ThreadSafe<LineBuffer>,
}

/// termios speed constant for a baud rate
fn baud_constant(baud_rate: u32) -> Option<libc::speed_t> {
    Some(match baud_rate {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        _ => return None,
    })
}

fn configuration_error(what: &str) -> TransportError {
    TransportError::ConfigurationError {
        reason: format!("{}: {}", what, io::Error::last_os_error()),
    }
}

/// Put the descriptor in raw 8N1 mode at `baud_rate`
fn configure(fd: RawFd, baud_rate: u32) -> Result<(), TransportError> {
    let speed = baud_constant(baud_rate).ok_or_else(|| TransportError::ConfigurationError {
        reason: format!("unsupported baud rate {}", baud_rate),
    })?;

    // SAFETY: termios is plain old data and `fd` is an open descriptor owned by the caller.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(configuration_error("tcgetattr"));
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CS8 | libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 0;
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(configuration_error("cfsetspeed"));
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(configuration_error("tcsetattr"));
        }
    }
    Ok(())
}

/// Wait until `events` are ready on `fd`; `Ok(false)` on timeout or signal
fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: `pfd` is a valid pollfd for the duration of the call.
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device error"));
    }
    Ok(rc > 0)
}

impl FdTransport {
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

    fn spawn_reader(
        &self,
        name: &str,
        file: Arc<File>,
        running: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        let callback = self.callback.clone();
        let line_buffer = self.line_buffer.clone();
        let read_timeout = self.read_timeout;
        let port_name = name.to_string();

        std::thread::Builder::new()
            .name("gcodestream-fd-rx".to_string())
            .spawn(move || {
                let fd = file.as_raw_fd();
                let mut buf = [0u8; 256];
                while running.load(Ordering::Acquire) {
                    match poll_fd(fd, libc::POLLIN, read_timeout) {
                        Ok(false) => continue,
                        Ok(true) => {}
                        Err(e) => {
                            if running.load(Ordering::Acquire) {
                                tracing::error!(port = %port_name, "poll failed: {}", e);
                            }
                            break;
                        }
                    }
                    match (&*file).read(&mut buf) {
                        Ok(0) => {
                            tracing::warn!(port = %port_name, "Device closed the connection");
                            break;
                        }
                        Ok(n) => {
                            let lines = line_buffer.lock().push(&buf[..n]);
                            let cb = callback.lock().clone();
                            if let Some(cb) = cb {
                                for line in &lines {
                                    tracing::trace!(port = %port_name, "<< {}", line);
                                    cb(line);
                                }
                            }
                        }
                        Err(e)
                            if e.kind() == io::ErrorKind::WouldBlock
                                || e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            tracing::error!(port = %port_name, "read failed: {}", e);
                            break;
                        }
                    }
                }
                tracing::debug!(port = %port_name, "fd reader stopped");
            })
    }

    fn write_all_bounded(&self, file: &File, bytes: &[u8]) -> Result<(), TransportError> {
        let timeout_ms = self.write_timeout.as_millis() as u64;
        let deadline = Instant::now() + self.write_timeout;
        let mut written = 0;

        while written < bytes.len() {
            match (&*file).write(&bytes[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(TransportError::WriteTimeout { timeout_ms });
                    }
                    poll_fd(file.as_raw_fd(), libc::POLLOUT, remaining)
                        .map_err(|e| TransportError::from_write_error(&e, timeout_ms))?;
                }
                Err(e) => return Err(TransportError::from_write_error(&e, timeout_ms)),
            }
        }
        Ok(())
    }
}

impl Transport for FdTransport {
    fn open(&self, address: &str, baud_rate: u32) -> Result<(), TransportError> {
        let mut guard = self.port.lock();
        if guard.is_some() {
            return Err(TransportError::ConfigurationError {
                reason: format!("{} is already open", address),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(address)
            .map_err(|e| {
                tracing::warn!("Failed to open {}: {}", address, e);
                TransportError::PortUnavailable {
                    port: address.to_string(),
                    reason: e.to_string(),
                }
            })?;

        configure(file.as_raw_fd(), baud_rate)?;

        self.line_buffer.lock().clear();
        let file = Arc::new(file);
        let running = Arc::new(AtomicBool::new(true));
        let reader = self
            .spawn_reader(address, file.clone(), running.clone())
            .map_err(|e| TransportError::Io {
                reason: e.to_string(),
            })?;

        tracing::info!("Opened {} at {} baud (raw fd)", address, baud_rate);
        *guard = Some(OpenFd {
            name: address.to_string(),
            file,
            running,
            reader: Some(reader),
        });
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        let Some(mut port) = self.port.lock().take() else {
            return Ok(());
        };
        port.running.store(false, Ordering::Release);
        if let Some(handle) = port.reader.take() {
            if handle.join().is_err() {
                tracing::warn!("fd reader for {} panicked", port.name);
            }
        }
        self.line_buffer.lock().clear();
        tracing::info!("Closed {}", port.name);
        Ok(())
    }

    fn write_line(&self, text: &str) -> Result<usize, TransportError> {
        let line = terminate_line(text);
        let guard = self.port.lock();
        let port = guard.as_ref().ok_or(TransportError::NotOpen)?;
        self.write_all_bounded(&port.file, line.as_bytes())
            .inspect_err(|e| tracing::error!("Write to {} failed: {}", port.name, e))?;
        tracing::trace!(port = %port.name, ">> {}", line.trim_end());
        Ok(line.len())
    }

    fn on_line_received(&self, callback: LineCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn clear_buffers(&self) -> Result<(), TransportError> {
        self.line_buffer.lock().clear();
        let guard = self.port.lock();
        let port = guard.as_ref().ok_or(TransportError::NotOpen)?;
        // SAFETY: the descriptor stays open while the guard is held.
        if unsafe { libc::tcflush(port.file.as_raw_fd(), libc::TCIOFLUSH) } != 0 {
            return Err(TransportError::Io {
                reason: io::Error::last_os_error().to_string(),
            });
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    fn reliable_acks(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "file_descriptor"
    }
}

impl Drop for FdTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
