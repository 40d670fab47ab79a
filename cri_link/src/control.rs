//! Control (CRI) channel.
//!
//! Low-rate TCP client used to query and change controller-wide state:
//! active/passive connection, motor enable, error reset and the position
//! interface configuration.
//!
//! # Threads
//!
//! ```text
//!  caller ──start()/stop()──► lifecycle lock ──spawns/joins──► cri-read
//!                                                              │  ├─ cri-keepalive (ALIVEJOG every 500 ms)
//!                                                              │  └─ cri-state-poll (GetActive + GetPositionInterface)
//!  caller / timers ──send()──► write lock { sequence, socket }
//! ```
//!
//! The read loop owns the receive buffer and is the only writer of
//! [`ControlState`]; everyone else reads copies via [`ControlChannel::state`].

use crate::connection::{close_stream, open_stream, pump_frames};
use crate::error::LinkError;
use crate::events::{ChannelKind, EventHub};
use crate::framing::{encode_command, FrameBuffer, SequenceCounter, CONTROL_MARKERS};
use crate::timer::PeriodicTimer;
use cri_common::config::ControlConfig;
use cri_common::consts::ERROR_CODE_NOT_CONNECTED;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// No-op jog keeping the controller link alive.
pub const KEEPALIVE_COMMAND: &str = "ALIVEJOG 0 0 0 0 0 0 0 0 0";

/// Controller-side state as last reported over the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlState {
    /// This connection is the active (commanding) one.
    pub connection_active: bool,
    /// Position interface is started on the controller.
    pub position_interface_running: bool,
    /// Position interface is the live position source.
    pub position_interface_active: bool,
    /// Hardware error code from the last `STATUS` message.
    pub error_code: String,
    /// Streaming port advertised by the controller, if any.
    pub position_interface_port: Option<u16>,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            connection_active: false,
            position_interface_running: false,
            position_interface_active: false,
            error_code: ERROR_CODE_NOT_CONNECTED.to_string(),
            position_interface_port: None,
        }
    }
}

/// State change carried by one inbound control message.
///
/// `None` fields did not parse and leave the state untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlUpdate {
    /// `STATUS ... ERROR <code> ...`
    ErrorCode(String),
    /// `CMD Active <bool>`
    Active(Option<bool>),
    /// `CMD PositionInterface <running> <in-use> [port]`
    PositionInterface {
        /// Interface started.
        running: Option<bool>,
        /// Interface selected as position source.
        active: Option<bool>,
        /// Advertised streaming port.
        port: Option<u16>,
    },
    /// `CONFIG PositionInterface <running>`
    InterfaceConfig {
        /// Interface started.
        running: Option<bool>,
    },
}

/// Boolean token as sent by the controller (`True`, `false`, ...).
fn parse_bool(token: &str) -> Option<bool> {
    match token.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Parse the payload of one control frame.
///
/// The first token (sequence number) is ignored and the second selects the
/// message kind. Returns `None` for kinds that carry no state.
pub fn parse_control_message(payload: &str) -> Option<ControlUpdate> {
    let tokens: Vec<&str> = payload.split_whitespace().collect();
    let kind = tokens.get(1)?;

    match *kind {
        "STATUS" => {
            let idx = tokens.iter().position(|t| *t == "ERROR")?;
            tokens
                .get(idx + 1)
                .map(|code| ControlUpdate::ErrorCode((*code).to_string()))
        }
        "CMD" if tokens.len() >= 4 && tokens[2] == "Active" => {
            Some(ControlUpdate::Active(parse_bool(tokens[3])))
        }
        "CMD" if tokens.len() >= 5 && tokens[2] == "PositionInterface" => {
            Some(ControlUpdate::PositionInterface {
                running: parse_bool(tokens[3]),
                active: parse_bool(tokens[4]),
                port: tokens.get(5).and_then(|p| p.parse::<u16>().ok()).filter(|p| *p != 0),
            })
        }
        "CONFIG" if tokens.len() >= 4 && tokens[2] == "PositionInterface" => {
            Some(ControlUpdate::InterfaceConfig {
                running: parse_bool(tokens[3]),
            })
        }
        _ => None,
    }
}

impl ControlState {
    /// Apply one parsed update.
    pub fn apply(&mut self, update: ControlUpdate) {
        match update {
            ControlUpdate::ErrorCode(code) => self.error_code = code,
            ControlUpdate::Active(active) => {
                if let Some(active) = active {
                    self.connection_active = active;
                }
            }
            ControlUpdate::PositionInterface { running, active, port } => {
                if let Some(running) = running {
                    self.position_interface_running = running;
                }
                if let Some(active) = active {
                    self.position_interface_active = active;
                }
                if port.is_some() {
                    self.position_interface_port = port;
                }
            }
            ControlUpdate::InterfaceConfig { running } => {
                if let Some(running) = running {
                    self.position_interface_running = running;
                }
            }
        }
    }
}

/// Socket and sequence counter, guarded together so numbers are never reused
/// or skipped.
#[derive(Default)]
struct ControlWriter {
    stream: Option<TcpStream>,
    sequence: SequenceCounter,
}

struct ControlShared {
    stop: AtomicBool,
    connected: AtomicBool,
    writer: Mutex<ControlWriter>,
    state: RwLock<ControlState>,
    events: EventHub,
}

impl ControlShared {
    fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst)
    }

    fn reset_state(&self) {
        *self.state.write() = ControlState::default();
    }

    /// Frame and write one command. Returns true if it was written.
    fn send(&self, command: &str) -> bool {
        if !self.is_running() {
            return false;
        }

        let mut writer = self.writer.lock();
        let ControlWriter { stream, sequence } = &mut *writer;
        let Some(stream) = stream.as_mut() else {
            return false;
        };

        let seq = sequence.next();
        let frame = encode_command(seq, command);
        match stream.write_all(frame.as_bytes()) {
            Ok(()) => {
                trace!("CRI Client: sent #{} '{}'", seq, command);
                true
            }
            Err(e) => {
                error!("CRI Client: Could not send message: {}", e);
                self.stop.store(true, Ordering::SeqCst);
                close_stream(stream);
                false
            }
        }
    }

    fn handle_payload(&self, payload: &str) {
        match parse_control_message(payload) {
            Some(update) => {
                trace!("CRI Client: {:?}", update);
                self.state.write().apply(update);
            }
            None => trace!("CRI Client: ignored '{}'", payload),
        }
    }
}

/// Client side of the control protocol.
pub struct ControlChannel {
    config: ControlConfig,
    shared: Arc<ControlShared>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    /// Create a stopped channel.
    ///
    /// Address and port in `config` are only defaults; [`start`](Self::start)
    /// takes the actual target.
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            shared: Arc::new(ControlShared {
                stop: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                writer: Mutex::new(ControlWriter::default()),
                state: RwLock::new(ControlState::default()),
                events: EventHub::new(ChannelKind::Control),
            }),
            read_task: Mutex::new(None),
        }
    }

    /// Connect to `address:port` in the background.
    ///
    /// A running connection is stopped first. Connect errors are not
    /// returned; they are logged and reported as a `connected: false` event.
    pub fn start(&self, address: &str, port: u16) {
        let mut read_task = self.read_task.lock();
        self.stop_locked(&mut read_task);
        // The join in stop_locked releases the lock; another start may win.
        while read_task.is_some() {
            self.stop_locked(&mut read_task);
        }

        info!("CRI Client: Connecting to server at {}:{}", address, port);
        self.shared.reset_state();
        self.shared.stop.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let address = address.to_string();
        match thread::Builder::new()
            .name("cri-read".to_string())
            .spawn(move || read_loop(shared, config, address, port))
        {
            Ok(handle) => *read_task = Some(handle),
            Err(e) => {
                error!("CRI Client: Could not spawn reader: {}", e);
                self.shared.stop.store(true, Ordering::SeqCst);
                self.shared.events.notify(false);
            }
        }
    }

    /// Send `QUIT`, close the connection and wait for the read loop to exit.
    ///
    /// Safe to call when not running and from any thread, including a
    /// connection listener of either channel.
    pub fn stop(&self) {
        let mut read_task = self.read_task.lock();
        self.stop_locked(&mut read_task);
    }

    /// Join happens with the lifecycle lock released, so a listener that
    /// stops this channel while we wait does not block on it.
    fn stop_locked(&self, read_task: &mut MutexGuard<'_, Option<JoinHandle<()>>>) {
        self.shared.send("QUIT");
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(stream) = self.shared.writer.lock().stream.as_ref() {
            close_stream(stream);
        }
        if let Some(handle) = read_task.take() {
            if handle.thread().id() != thread::current().id() {
                MutexGuard::unlocked(read_task, || {
                    let _ = handle.join();
                });
            }
        }
        self.shared.reset_state();
    }

    /// True while the socket is connected and no stop has been requested.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Copy of the controller state.
    pub fn state(&self) -> ControlState {
        self.shared.state.read().clone()
    }

    /// Connection events of this channel.
    pub fn events(&self) -> &EventHub {
        &self.shared.events
    }

    /// Request the active/passive state.
    pub fn request_get_active(&self) -> bool {
        self.shared.send("CMD GetActive")
    }

    /// Request that this connection becomes the active one.
    pub fn send_set_active(&self) -> bool {
        info!("CRI Client: Requesting active connection");
        self.shared.send("CMD SetActive true")
    }

    /// Request an error reset.
    pub fn send_reset_errors(&self) -> bool {
        self.ensure_active();
        info!("CRI Client: Requesting error reset");
        self.shared.send("CMD Reset")
    }

    /// Request enabling the motors.
    pub fn send_enable_motors(&self) -> bool {
        self.ensure_active();
        info!("CRI Client: Requesting enable motors");
        self.shared.send("CMD Enable")
    }

    /// Request disabling the motors.
    pub fn send_disable_motors(&self) -> bool {
        self.ensure_active();
        info!("CRI Client: Requesting disable motors");
        self.shared.send("CMD Disable")
    }

    /// Request the position interface state.
    pub fn request_get_position_interface(&self) -> bool {
        self.shared.send("CMD GetPositionInterface")
    }

    /// Request starting or stopping the position interface.
    pub fn send_configure_position_interface(&self, enabled: bool) -> bool {
        self.ensure_active();
        info!("CRI Client: Requesting position interface enabled={}", enabled);
        self.shared
            .send(&format!("CONFIG SetPositionInterface {enabled}"))
    }

    /// Request (de)selecting the position interface as position source.
    pub fn send_use_position_interface(&self, use_interface: bool) -> bool {
        self.ensure_active();
        info!("CRI Client: Requesting use of position interface={}", use_interface);
        self.shared
            .send(&format!("CMD UsePositionInterface {use_interface}"))
    }

    /// Mutating commands are rejected from a passive connection.
    fn ensure_active(&self) {
        if !self.shared.state.read().connection_active {
            self.send_set_active();
        }
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(shared: Arc<ControlShared>, config: ControlConfig, address: String, port: u16) {
    if let Err(e) = run_connection(&shared, &config, &address, port) {
        error!("CRI Client: Reader failed: {}", e);
    }

    shared.stop.store(true, Ordering::SeqCst);
    shared.connected.store(false, Ordering::SeqCst);
    if let Some(stream) = shared.writer.lock().stream.take() {
        close_stream(&stream);
    }
    shared.reset_state();
    shared.events.notify(false);
    info!("CRI Client: Stopped");
}

fn run_connection(
    shared: &Arc<ControlShared>,
    config: &ControlConfig,
    address: &str,
    port: u16,
) -> Result<(), LinkError> {
    let stream = open_stream(
        address,
        port,
        Duration::from_millis(config.connect_timeout_ms),
        Duration::from_millis(config.read_timeout_ms),
    )?;
    shared.writer.lock().stream = Some(stream.try_clone()?);
    if shared.stop.load(Ordering::SeqCst) {
        debug!("CRI Client: stop requested while connecting");
        return Ok(());
    }
    shared.connected.store(true, Ordering::SeqCst);

    let mut timers = Vec::with_capacity(2);
    let keepalive = Arc::clone(shared);
    match PeriodicTimer::spawn(
        "cri-keepalive",
        Duration::from_millis(config.keepalive_ms),
        move || {
            keepalive.send(KEEPALIVE_COMMAND);
        },
    ) {
        Ok(timer) => timers.push(timer),
        Err(e) => warn!("CRI Client: keepalive timer unavailable: {}", e),
    }
    let poll = Arc::clone(shared);
    match PeriodicTimer::spawn(
        "cri-state-poll",
        Duration::from_millis(config.state_poll_ms),
        move || {
            poll.send("CMD GetActive");
            poll.send("CMD GetPositionInterface");
        },
    ) {
        Ok(timer) => timers.push(timer),
        Err(e) => warn!("CRI Client: state poll timer unavailable: {}", e),
    }

    info!("CRI Client: connected to {}:{}", address, port);
    shared.events.notify(true);

    shared.send("CMD GetActive");
    shared.send("CMD GetPositionInterface");

    let mut frames = FrameBuffer::new(CONTROL_MARKERS);
    let result = pump_frames(&stream, &shared.stop, &mut frames, ChannelKind::Control, |payload| {
        shared.handle_payload(payload)
    });

    for timer in &mut timers {
        timer.stop();
    }
    match result {
        Err(LinkError::Closed) => {
            info!("CRI Client: connection closed by controller");
            Ok(())
        }
        other => other,
    }
}
