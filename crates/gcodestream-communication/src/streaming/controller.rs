//! Streaming controller
//!
//! Owns the command list and the position within it, and drives a background
//! transmit loop against a [`Transport`]. Two threads touch the session: the
//! transport's reader thread (device responses) and the transmit loop. All
//! mutable session state sits behind one mutex; a condition variable wakes the
//! loop whenever an acknowledgement, resend or caller request may let it move.
//!
//! A window slot is reserved and the position advanced under the lock before
//! the line is written, so the reader can never observe a half-sent line.

use crate::communication::{create_transport, LineCallback, Transport, TransportOptions};
use crate::protocol::{classify, format_line, FormattedLine, Response};
use crate::streaming::config::{FlowControlMode, StreamerConfig};
use crate::streaming::window::FlowWindow;
use gcodestream_core::{
    gcode, CommandedPosition, ConnectionState, Error, EventDispatcher, ResponseLogEntry, Result,
    SessionId, StatusSnapshot, StreamError, StreamEvent, StreamingState, TransportError,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Sequence number of the first buffered line after a connect or reset
pub const FIRST_SEQUENCE: u64 = 1;

/// Sent once connected when firmware querying is enabled
pub const FIRMWARE_QUERY: &str = "M115";

/// Resets the firmware's line counter so the next expected number is `FIRST_SEQUENCE`
const LINE_NUMBER_RESET: &str = "M110 N0";

const STALL_CHECK_INTERVAL: Duration = Duration::from_millis(250);

struct SessionState {
    connection: ConnectionState,
    streaming: StreamingState,
    commands: Vec<String>,
    position: usize,
    window: FlowWindow,
    next_sequence: u64,
    sequence_index: HashMap<u64, usize>,
    manual_queue: VecDeque<String>,
    shutdown: bool,
    session: SessionId,
    device_ready: bool,
    last_device_error: Option<String>,
    last_event: String,
    resend_target: Option<u64>,
    consecutive_resends: u32,
    last_progress: Instant,
    stall_reported: bool,
    commanded_position: CommandedPosition,
    response_log: VecDeque<ResponseLogEntry>,
}

impl SessionState {
    fn new(window: FlowWindow) -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            streaming: StreamingState::Idle,
            commands: Vec::new(),
            position: 0,
            window,
            next_sequence: FIRST_SEQUENCE,
            sequence_index: HashMap::new(),
            manual_queue: VecDeque::new(),
            shutdown: false,
            session: SessionId::new(),
            device_ready: false,
            last_device_error: None,
            last_event: String::new(),
            resend_target: None,
            consecutive_resends: 0,
            last_progress: Instant::now(),
            stall_reported: false,
            commanded_position: CommandedPosition::default(),
            response_log: VecDeque::new(),
        }
    }

    fn clear_resend_tracking(&mut self) {
        self.resend_target = None;
        self.consecutive_resends = 0;
    }

    fn record_response(&mut self, line: &str, limit: usize) {
        if limit == 0 {
            return;
        }
        while self.response_log.len() >= limit {
            self.response_log.pop_front();
        }
        self.response_log.push_back(ResponseLogEntry::now(line));
    }

    /// Idle without a program, otherwise Paused; a connect never auto-starts
    fn resting_state(&self) -> StreamingState {
        if self.connection.is_connected() && !self.commands.is_empty() {
            StreamingState::Paused
        } else {
            StreamingState::Idle
        }
    }
}

/// A line reserved by the transmit loop, written outside the lock
struct Job {
    line: FormattedLine,
    index: Option<usize>,
    source: String,
}

struct Shared {
    config: StreamerConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    wake: Condvar,
    events: EventDispatcher,
}

impl Shared {
    fn new_window(&self) -> FlowWindow {
        let capacity = self.config.receive_buffer_size;
        match self
            .config
            .flow_control
            .resolve(self.transport.reliable_acks())
        {
            FlowControlMode::Unthrottled => FlowWindow::unthrottled(capacity),
            _ => FlowWindow::new(capacity),
        }
    }

    fn emit(&self, st: &mut SessionState, event: StreamEvent) {
        if !matches!(
            event,
            StreamEvent::Acknowledged | StreamEvent::LineSent { .. }
        ) {
            st.last_event = event.to_string();
        }
        self.events.publish(event);
    }

    fn set_connection(&self, st: &mut SessionState, state: ConnectionState) {
        if !st.connection.can_transition_to(state) {
            tracing::warn!(
                session = %st.session,
                "Unexpected connection transition {} -> {}",
                st.connection,
                state
            );
        }
        if st.connection != state {
            st.connection = state;
            self.emit(st, StreamEvent::ConnectionChanged(state));
        }
    }

    fn set_streaming(&self, st: &mut SessionState, state: StreamingState) {
        if st.streaming != state {
            st.streaming = state;
            self.emit(st, StreamEvent::StreamingChanged(state));
        }
    }

    /// Lines are owed acknowledgements that have not come within the timeout
    ///
    /// Holds in every playback state: lines still in flight after `Complete`
    /// or a pause are owed their `ok` just the same.
    fn is_stalled(&self, st: &SessionState) -> bool {
        st.connection.is_connected()
            && !st.window.is_empty()
            && st.last_progress.elapsed() >= self.config.stall_timeout
    }

    fn check_stall(&self, st: &mut SessionState) {
        if !st.stall_reported && self.is_stalled(st) {
            st.stall_reported = true;
            tracing::warn!(
                session = %st.session,
                outstanding = st.window.bytes_outstanding(),
                "No acknowledgement for {:?}",
                self.config.stall_timeout
            );
            self.emit(st, StreamEvent::Stalled);
        }
    }

    fn reserve(&self, st: &mut SessionState, bytes: usize) {
        if st.window.is_empty() {
            st.last_progress = Instant::now();
        }
        st.window.record_sent(bytes);
    }

    /// Pick and reserve the next line to write, if any may be sent now
    ///
    /// Manual commands go first and are serviced even while paused.
    fn next_job(&self, st: &mut SessionState) -> Option<Job> {
        if !st.connection.is_connected() {
            return None;
        }

        while let Some(command) = st.manual_queue.front().cloned() {
            let Some(line) = format_line(&command, 0, false) else {
                st.manual_queue.pop_front();
                continue;
            };
            let bytes = line.window_bytes();
            if line.buffered && !st.window.fits_at_all(bytes) {
                st.manual_queue.pop_front();
                let err = StreamError::LineExceedsBuffer {
                    index: st.position,
                    bytes,
                    capacity: st.window.capacity(),
                };
                tracing::warn!(
                    session = %st.session,
                    "Dropping manual command {:?}: {}",
                    command,
                    err
                );
                self.emit(st, StreamEvent::Fault(err.to_string()));
                continue;
            }
            if line.buffered && !st.window.can_send(bytes) {
                return None;
            }
            st.manual_queue.pop_front();
            self.reserve(st, bytes);
            return Some(Job {
                line,
                index: None,
                source: command,
            });
        }

        if !st.streaming.is_active() {
            return None;
        }

        loop {
            let index = st.position;
            if index >= st.commands.len() {
                let total = st.commands.len();
                tracing::info!(session = %st.session, total, "Program complete");
                self.set_streaming(st, StreamingState::Complete);
                self.emit(st, StreamEvent::Completed);
                return None;
            }

            let Some(line) = format_line(
                &st.commands[index],
                st.next_sequence,
                self.config.line_numbers,
            ) else {
                st.position += 1;
                continue;
            };

            let bytes = line.window_bytes();
            if line.buffered && !st.window.fits_at_all(bytes) {
                let err = StreamError::LineExceedsBuffer {
                    index,
                    bytes,
                    capacity: st.window.capacity(),
                };
                tracing::warn!(session = %st.session, "{}", err);
                self.set_streaming(st, StreamingState::Paused);
                self.emit(st, StreamEvent::Fault(err.to_string()));
                return None;
            }
            if line.buffered && !st.window.can_send(bytes) {
                return None;
            }

            self.reserve(st, bytes);
            if let Some(seq) = line.sequence {
                st.sequence_index.insert(seq, index);
                st.next_sequence = seq + 1;
            }
            st.position = index + 1;
            return Some(Job {
                line,
                index: Some(index),
                source: st.commands[index].clone(),
            });
        }
    }

    /// Settle a written job; returns how long to idle before the next line
    fn finish_job(
        &self,
        st: &mut SessionState,
        job: Job,
        result: std::result::Result<usize, TransportError>,
    ) -> Option<Duration> {
        match result {
            Ok(_) => {
                st.commanded_position.merge(gcode::axis_words(&job.source));
                tracing::debug!(
                    session = %st.session,
                    index = ?job.index,
                    ">> {}",
                    job.line.text
                );
                self.emit(
                    st,
                    StreamEvent::LineSent {
                        index: job.index,
                        line: job.line.text,
                    },
                );
                let delay = self.config.unthrottled_line_delay;
                (job.index.is_some() && st.window.is_unthrottled() && !delay.is_zero())
                    .then_some(delay)
            }
            Err(err) => {
                tracing::error!(session = %st.session, "Write failed: {}", err);
                st.window.rollback_last();
                if let Some(index) = job.index {
                    if st.position == index + 1 {
                        st.position = index;
                    }
                    if let Some(seq) = job.line.sequence {
                        st.sequence_index.remove(&seq);
                        if st.next_sequence == seq + 1 {
                            st.next_sequence = seq;
                        }
                    }
                }
                if st.streaming == StreamingState::Streaming {
                    self.set_streaming(st, StreamingState::Paused);
                }
                self.emit(st, StreamEvent::WriteFailed(err.to_string()));
                None
            }
        }
    }

    /// Reader-thread entry point for every received line
    fn handle_line(&self, line: &str) {
        let response = classify(line);
        let mut st = self.state.lock();
        tracing::debug!(session = %st.session, "<< {}", line);
        if !response.is_ack() {
            st.record_response(line, self.config.response_log_size);
        }

        match response {
            Response::Ack => {
                st.window.record_acked();
                st.last_progress = Instant::now();
                st.stall_reported = false;
                self.emit(&mut st, StreamEvent::Acknowledged);
            }
            Response::Ready(text) => {
                tracing::info!(session = %st.session, "Device ready: {}", text);
                st.device_ready = true;
                self.emit(&mut st, StreamEvent::DeviceReady(text));
            }
            Response::Error(text) => {
                tracing::warn!(session = %st.session, "Device error: {}", text);
                st.last_device_error = Some(text.clone());
                self.emit(&mut st, StreamEvent::DeviceError(text));
            }
            Response::ResendRequest(requested) => self.handle_resend(&mut st, requested),
            Response::Info(text) => self.emit(&mut st, StreamEvent::Info(text)),
        }

        drop(st);
        self.wake.notify_all();
    }

    /// Rewind to the requested line; the only path that moves position backwards
    fn handle_resend(&self, st: &mut SessionState, requested: Option<u64>) {
        if !st.connection.is_connected() {
            return;
        }

        let total = st.commands.len();
        let index = match requested {
            Some(n) if self.config.line_numbers => st
                .sequence_index
                .get(&n)
                .copied()
                .unwrap_or_else(|| usize::try_from(n).unwrap_or(usize::MAX)),
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
            None => st.position,
        }
        .min(total);

        if self.config.line_numbers {
            if let Some(n) = requested {
                st.next_sequence = n;
            }
        }

        let target = requested.unwrap_or(index as u64);
        if st.resend_target == Some(target) {
            st.consecutive_resends += 1;
        } else {
            st.resend_target = Some(target);
            st.consecutive_resends = 1;
        }
        let count = st.consecutive_resends;

        tracing::warn!(
            session = %st.session,
            requested = ?requested,
            from = st.position,
            to = index,
            count,
            "Device requested resend"
        );
        st.position = index;
        if st.streaming == StreamingState::Complete && index < total {
            self.set_streaming(st, StreamingState::Streaming);
        }
        self.emit(st, StreamEvent::ResendRequested { index, count });

        let threshold = self.config.desync_threshold;
        if threshold > 0 && count >= threshold {
            let err = StreamError::ProtocolDesync {
                line: target,
                count,
            };
            tracing::warn!(session = %st.session, "{}", err);
            self.emit(
                st,
                StreamEvent::ProtocolDesync {
                    line: target,
                    count,
                },
            );
        }
    }
}

fn transmit_loop(shared: Arc<Shared>, session: SessionId) {
    tracing::debug!(session = %session, "Transmit loop started");
    loop {
        let job = {
            let mut st = shared.state.lock();
            loop {
                if st.shutdown {
                    tracing::debug!(session = %session, "Transmit loop stopped");
                    return;
                }
                if let Some(job) = shared.next_job(&mut st) {
                    break job;
                }
                shared.wake.wait_for(&mut st, STALL_CHECK_INTERVAL);
                shared.check_stall(&mut st);
            }
        };

        let result = shared.transport.write_line(&job.line.text);

        let idle = {
            let mut st = shared.state.lock();
            shared.finish_job(&mut st, job, result)
        };
        if let Some(delay) = idle {
            std::thread::sleep(delay);
        }
    }
}

/// Session object driving one device
///
/// Every method takes `&self`, so the controller can be shared behind an
/// `Arc` between a UI thread and a console thread. Do not call
/// [`disconnect`](Self::disconnect) from an event subscriber running on the
/// transport's reader thread.
pub struct StreamingController {
    shared: Arc<Shared>,
    transmit_loop: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingController {
    /// Create a controller over an existing transport
    pub fn new(transport: Arc<dyn Transport>, config: StreamerConfig) -> Self {
        let events = EventDispatcher::new(config.event_buffer);
        let window = FlowWindow::new(config.receive_buffer_size);
        let shared = Arc::new(Shared {
            config,
            transport,
            state: Mutex::new(SessionState::new(window)),
            wake: Condvar::new(),
            events,
        });
        let window = shared.new_window();
        shared.state.lock().window = window;

        Self {
            shared,
            transmit_loop: Mutex::new(None),
        }
    }

    /// Create a controller with the transport selected by `options`
    pub fn with_options(options: &TransportOptions, config: StreamerConfig) -> Result<Self> {
        let transport = create_transport(options)?;
        Ok(Self::new(transport, config))
    }

    /// Active configuration
    pub fn config(&self) -> &StreamerConfig {
        &self.shared.config
    }

    /// Open the transport and start the session
    ///
    /// Waits for the configured settle delay, discards stale input, resets
    /// the window and the sequence counter, then starts the transmit loop.
    /// Playback stays paused until [`play`](Self::play).
    pub fn connect(&self, address: &str, baud_rate: u32) -> Result<()> {
        {
            let mut st = self.shared.state.lock();
            if matches!(
                st.connection,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                return Err(StreamError::AlreadyConnected.into());
            }
            st.shutdown = false;
            self.shared.set_connection(&mut st, ConnectionState::Connecting);
        }

        let session = SessionId::new();
        let transport = &self.shared.transport;
        tracing::info!(
            session = %session,
            address,
            baud_rate,
            transport = transport.name(),
            "Connecting"
        );

        if let Err(err) = transport.open(address, baud_rate) {
            self.fail_connect(&err.to_string());
            return Err(err.into());
        }

        let settle = self.shared.config.settle_delay;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }

        if let Err(err) = transport.clear_buffers() {
            let _ = transport.close();
            self.fail_connect(&err.to_string());
            return Err(err.into());
        }

        let weak = Arc::downgrade(&self.shared);
        let callback: LineCallback = Arc::new(move |line: &str| {
            if let Some(shared) = weak.upgrade() {
                shared.handle_line(line);
            }
        });
        transport.on_line_received(callback);

        {
            let mut st = self.shared.state.lock();
            st.window = self.shared.new_window();
            st.next_sequence = FIRST_SEQUENCE;
            st.sequence_index.clear();
            st.manual_queue.clear();
            st.session = session;
            st.device_ready = false;
            st.last_device_error = None;
            st.clear_resend_tracking();
            st.stall_reported = false;
            st.last_progress = Instant::now();

            if self.shared.config.line_numbers {
                st.manual_queue.push_back(LINE_NUMBER_RESET.to_string());
            }
            if self.shared.config.query_firmware_on_connect {
                st.manual_queue.push_back(FIRMWARE_QUERY.to_string());
            }

            self.shared.set_connection(&mut st, ConnectionState::Connected);
            let resting = st.resting_state();
            self.shared.set_streaming(&mut st, resting);
        }

        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("gcodestream-tx".to_string())
            .spawn(move || transmit_loop(shared, session));
        match handle {
            Ok(handle) => *self.transmit_loop.lock() = Some(handle),
            Err(err) => {
                let _ = transport.close();
                self.fail_connect(&err.to_string());
                return Err(Error::Io(err));
            }
        }

        self.shared.wake.notify_all();
        tracing::info!(session = %session, address, "Connected");
        Ok(())
    }

    fn fail_connect(&self, reason: &str) {
        tracing::error!("Connect failed: {}", reason);
        let mut st = self.shared.state.lock();
        self.shared.set_connection(&mut st, ConnectionState::Failed);
        self.shared.emit(&mut st, StreamEvent::Fault(reason.to_string()));
    }

    /// Stop the transmit loop, close the transport and clear the window
    ///
    /// The command list and position survive so a reconnect can resume.
    pub fn disconnect(&self) -> Result<()> {
        let session = {
            let mut st = self.shared.state.lock();
            st.shutdown = true;
            st.session
        };
        self.shared.wake.notify_all();

        if let Some(handle) = self.transmit_loop.lock().take() {
            if handle.join().is_err() {
                tracing::warn!(session = %session, "Transmit loop panicked");
            }
        }

        let transport = &self.shared.transport;
        let closed = if transport.is_open() {
            let _ = transport.clear_buffers();
            transport.close()
        } else {
            Ok(())
        };

        {
            let mut st = self.shared.state.lock();
            st.window.reset();
            st.manual_queue.clear();
            st.shutdown = false;
            self.shared.set_connection(&mut st, ConnectionState::Disconnected);
            self.shared.set_streaming(&mut st, StreamingState::Idle);
        }
        tracing::info!(session = %session, "Disconnected");

        closed.map_err(Error::from)
    }

    /// Replace the whole program; playback stays paused
    pub fn load_commands<I, S>(&self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let commands: Vec<String> = commands.into_iter().map(Into::into).collect();
        let mut st = self.shared.state.lock();
        tracing::info!(session = %st.session, total = commands.len(), "Loaded program");
        st.commands = commands;
        st.position = 0;
        st.sequence_index.clear();
        st.clear_resend_tracking();
        let resting = st.resting_state();
        self.shared.set_streaming(&mut st, resting);
        drop(st);
        self.shared.wake.notify_all();
    }

    /// Replace only the commands at and after the current position
    ///
    /// Lines already handed to the device are never touched or resent.
    pub fn replace_upcoming<I, S>(&self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut st = self.shared.state.lock();
        let position = st.position.min(st.commands.len());
        st.commands.truncate(position);
        st.commands.extend(commands.into_iter().map(Into::into));
        st.sequence_index.retain(|_, index| *index < position);
        tracing::info!(
            session = %st.session,
            position,
            total = st.commands.len(),
            "Replaced upcoming commands"
        );

        if st.connection.is_connected()
            && position < st.commands.len()
            && matches!(st.streaming, StreamingState::Complete | StreamingState::Idle)
        {
            self.shared.set_streaming(&mut st, StreamingState::Paused);
        }
        drop(st);
        self.shared.wake.notify_all();
    }

    /// Start or resume playback
    ///
    /// A no-op when already streaming or complete.
    pub fn play(&self) -> Result<()> {
        let mut st = self.shared.state.lock();
        if !st.connection.is_connected() {
            return Err(StreamError::NotConnected.into());
        }
        if st.commands.is_empty() {
            return Err(StreamError::NothingToStream.into());
        }
        if matches!(
            st.streaming,
            StreamingState::Streaming | StreamingState::Complete
        ) {
            return Ok(());
        }

        st.last_progress = Instant::now();
        st.stall_reported = false;
        tracing::info!(session = %st.session, position = st.position, "Playing");
        self.shared.set_streaming(&mut st, StreamingState::Streaming);
        drop(st);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Stop sending new program lines; position and window are kept
    pub fn pause(&self) {
        let mut st = self.shared.state.lock();
        if st.streaming == StreamingState::Streaming {
            tracing::info!(session = %st.session, position = st.position, "Paused");
            self.shared.set_streaming(&mut st, StreamingState::Paused);
        }
    }

    /// Start over with `commands`: position 0, empty window, fresh sequence
    ///
    /// The transport stays open.
    pub fn reset<I, S>(&self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut st = self.shared.state.lock();
        st.commands = commands.into_iter().map(Into::into).collect();
        st.position = 0;
        st.window.reset();
        st.next_sequence = FIRST_SEQUENCE;
        st.sequence_index.clear();
        st.clear_resend_tracking();
        st.stall_reported = false;
        st.commanded_position = CommandedPosition::default();
        if st.connection.is_connected() && self.shared.config.line_numbers {
            st.manual_queue.push_back(LINE_NUMBER_RESET.to_string());
        }
        tracing::info!(session = %st.session, total = st.commands.len(), "Reset");

        let resting = st.resting_state();
        self.shared.set_streaming(&mut st, resting);
        drop(st);
        self.shared.wake.notify_all();
    }

    /// Queue a one-off command ahead of the program
    ///
    /// Sent unsequenced and charged against the window; serviced while paused.
    pub fn send_command(&self, command: &str) -> Result<()> {
        let mut st = self.shared.state.lock();
        if !st.connection.is_connected() {
            return Err(StreamError::NotConnected.into());
        }
        st.manual_queue.push_back(command.to_string());
        drop(st);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Snapshot of the session for display
    pub fn current_status(&self) -> StatusSnapshot {
        let st = self.shared.state.lock();
        StatusSnapshot {
            connection_state: st.connection,
            streaming_state: st.streaming,
            position: st.position,
            total: st.commands.len(),
            last_event: st.last_event.clone(),
            bytes_outstanding: st.window.bytes_outstanding(),
            buffer_capacity: st.window.capacity(),
            device_ready: st.device_ready,
            last_device_error: st.last_device_error.clone(),
            consecutive_resends: st.consecutive_resends,
            stalled: self.shared.is_stalled(&st),
            commanded_position: st.commanded_position,
        }
    }

    /// Current program, including lines already sent
    pub fn commands(&self) -> Vec<String> {
        self.shared.state.lock().commands.clone()
    }

    /// Recent non-ack device lines, oldest first
    pub fn response_log(&self) -> Vec<ResponseLogEntry> {
        self.shared
            .state
            .lock()
            .response_log
            .iter()
            .cloned()
            .collect()
    }

    /// Identifier of the current (or last) session
    pub fn session_id(&self) -> SessionId {
        self.shared.state.lock().session
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for StreamingController {
    fn drop(&mut self) {
        let active = self.transmit_loop.lock().is_some() || self.shared.transport.is_open();
        if active {
            let _ = self.disconnect();
        }
    }
}
