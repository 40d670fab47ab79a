//! Connect sequence and link supervision.
//!
//! Brings up both channels in the order the controller requires and keeps
//! them consistent afterwards:
//!
//! ```text
//! Disconnected ─► ConnectingControl ─► ControlUp ─► ConfiguringInterface
//!                                                          │
//!                   Active ◄──────── StreamingUp ◄─────────┘
//!
//! any phase ──timeout / socket error──► Failed
//! any phase ──disconnect()───────────► Disconnected
//! ```
//!
//! Every wait is a bounded poll that sleeps `handshake.poll_ms` between
//! checks. A timeout stops the channels started so far; nothing is retried.
//!
//! A supervisor thread receives the connection events of both channels. When
//! either channel drops, it stops the other one: streaming without the
//! control link (or the reverse) is never left running.

use crate::control::{ControlChannel, ControlState};
use crate::error::{HandshakeError, LinkError};
use crate::events::{ChannelKind, ConnectionEvent, ListenerId};
use crate::source::JogSource;
use crate::streaming::StreamingChannel;
use cri_common::config::LinkConfig;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Externally observed state of the combined link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LinkPhase {
    /// Nothing connected.
    #[default]
    Disconnected,
    /// Control channel connecting.
    ConnectingControl,
    /// Control channel connected.
    ControlUp,
    /// Waiting for the position interface to start.
    ConfiguringInterface,
    /// Streaming channel connecting or waiting for activation.
    StreamingUp,
    /// Streaming positions drive the robot.
    Active,
    /// Last connect sequence aborted.
    Failed,
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LinkPhase::Disconnected => "disconnected",
            LinkPhase::ConnectingControl => "connecting control",
            LinkPhase::ControlUp => "control up",
            LinkPhase::ConfiguringInterface => "configuring interface",
            LinkPhase::StreamingUp => "streaming up",
            LinkPhase::Active => "active",
            LinkPhase::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Summary of both channels.
///
/// `Display` renders the operator status line.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    /// Link phase.
    pub phase: LinkPhase,
    /// Control channel running.
    pub control_running: bool,
    /// Streaming channel running.
    pub streaming_running: bool,
    /// Controller state seen by the control channel.
    pub control: ControlState,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.control_running, self.streaming_running) {
            (false, false) => write!(f, "Not connected"),
            (false, true) => write!(f, "CRI not connected"),
            (true, false) => write!(f, "{}, position not connected", self.control.error_code),
            (true, true) => write!(f, "{}", self.control.error_code),
        }
    }
}

enum SupervisorMsg {
    Connection(ConnectionEvent),
    Shutdown,
}

struct LinkInner {
    config: LinkConfig,
    control: ControlChannel,
    streaming: StreamingChannel,
    phase: RwLock<LinkPhase>,
    cancel: AtomicBool,
    in_progress: AtomicBool,
    jog: Mutex<Option<Arc<Mutex<JogSource>>>>,
}

impl LinkInner {
    fn set_phase(&self, phase: LinkPhase) {
        let mut current = self.phase.write();
        if *current != phase {
            debug!("Link phase {} -> {}", *current, phase);
            *current = phase;
        }
    }

    fn begin_handshake(&self) -> Result<(), HandshakeError> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| HandshakeError::Busy)
    }

    /// Run the sequence; `begin_handshake` must have succeeded.
    fn run_handshake(&self) -> Result<(), HandshakeError> {
        self.cancel.store(false, Ordering::SeqCst);
        let result = self.handshake_steps();
        match &result {
            Ok(()) => {
                self.set_phase(LinkPhase::Active);
                info!("Link active");
            }
            Err(HandshakeError::Cancelled(phase)) => {
                info!("Connect sequence cancelled during {}", phase);
                self.set_phase(LinkPhase::Disconnected);
            }
            Err(e) => {
                warn!("Connect sequence aborted: {}", e);
                self.set_phase(LinkPhase::Failed);
            }
        }
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    fn handshake_steps(&self) -> Result<(), HandshakeError> {
        let hs = &self.config.handshake;
        let address = self.config.control.address.as_str();

        self.set_phase(LinkPhase::ConnectingControl);
        self.control.start(address, self.config.control.port);
        self.wait_for(LinkPhase::ConnectingControl, hs.connect_timeout(), false, || {
            self.control.is_running()
        })
        .inspect_err(|_| self.abort())?;
        self.set_phase(LinkPhase::ControlUp);

        self.set_phase(LinkPhase::ConfiguringInterface);
        if !self.control.state().position_interface_running {
            self.control.send_configure_position_interface(true);
        }
        self.wait_for(
            LinkPhase::ConfiguringInterface,
            hs.interface_start_timeout(),
            true,
            || {
                if self.control.state().position_interface_running {
                    return true;
                }
                self.control.request_get_position_interface();
                false
            },
        )
        .inspect_err(|_| self.abort())?;

        let port = self
            .control
            .state()
            .position_interface_port
            .unwrap_or(self.config.streaming.fallback_port);
        self.set_phase(LinkPhase::StreamingUp);
        self.streaming
            .start(self.config.streaming.interval_ms, address, i64::from(port));
        self.wait_for(LinkPhase::StreamingUp, hs.connect_timeout(), true, || {
            self.streaming.is_running()
        })
        .inspect_err(|_| self.abort())?;

        // The controller reverts to its default source if told to switch
        // before it sees streaming traffic.
        self.pause(LinkPhase::StreamingUp, hs.settle())
            .inspect_err(|_| self.abort())?;

        if !self.control.state().position_interface_active {
            self.control.send_use_position_interface(true);
        }
        self.wait_for(
            LinkPhase::StreamingUp,
            hs.interface_activate_timeout(),
            true,
            || {
                if self.control.state().position_interface_active {
                    return true;
                }
                self.control.request_get_position_interface();
                false
            },
        )
        .inspect_err(|_| self.abort())?;

        Ok(())
    }

    /// Poll `done` until it returns true.
    ///
    /// With `require_control` a control disconnect ends the wait early.
    fn wait_for<F>(
        &self,
        phase: LinkPhase,
        timeout: Duration,
        require_control: bool,
        mut done: F,
    ) -> Result<(), HandshakeError>
    where
        F: FnMut() -> bool,
    {
        let poll = self.config.handshake.poll();
        let deadline = Instant::now() + timeout;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(HandshakeError::Cancelled(phase));
            }
            if done() {
                return Ok(());
            }
            if require_control && !self.control.is_running() {
                return Err(HandshakeError::ConnectionLost(phase));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(HandshakeError::Timeout {
                    phase,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    /// Sleep for `duration` while watching for cancellation and link loss.
    fn pause(&self, phase: LinkPhase, duration: Duration) -> Result<(), HandshakeError> {
        let poll = self.config.handshake.poll();
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(HandshakeError::Cancelled(phase));
            }
            if !self.control.is_running() || !self.streaming.is_running() {
                return Err(HandshakeError::ConnectionLost(phase));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(poll.min(deadline - now));
        }
    }

    fn abort(&self) {
        self.streaming.stop();
        self.control.stop();
    }

    /// The streaming channel re-anchors the generator on fresh feedback.
    fn stop_jog(&self) {
        if let Some(jog) = self.jog.lock().as_ref() {
            jog.lock().reset(None);
        }
    }

    fn on_connection_event(&self, event: ConnectionEvent) {
        debug!("{} connected={}", event.channel, event.connected);
        self.stop_jog();
        if event.connected {
            return;
        }

        match event.channel {
            ChannelKind::Control => {
                if self.streaming.is_running() {
                    info!("CRI disconnected, stopping position interface");
                }
                self.streaming.stop();
            }
            ChannelKind::Streaming => {
                if self.control.is_running() {
                    info!("Position interface disconnected, stopping CRI");
                }
                self.control.stop();
            }
        }

        if !self.in_progress.load(Ordering::SeqCst) {
            let mut phase = self.phase.write();
            if *phase != LinkPhase::Failed && *phase != LinkPhase::Disconnected {
                info!("Link lost in phase {}", *phase);
                *phase = LinkPhase::Disconnected;
            }
        }
    }
}

fn supervise(inner: Arc<LinkInner>, rx: Receiver<SupervisorMsg>) {
    for msg in rx {
        match msg {
            SupervisorMsg::Connection(event) => inner.on_connection_event(event),
            SupervisorMsg::Shutdown => break,
        }
    }
    debug!("Link supervisor stopped");
}

/// Owner of both channels and the connect sequence.
pub struct LinkOrchestrator {
    inner: Arc<LinkInner>,
    supervisor_tx: Sender<SupervisorMsg>,
    supervisor: Option<JoinHandle<()>>,
    listeners: [(ChannelKind, ListenerId); 2],
}

impl LinkOrchestrator {
    /// Create both channels and start the supervisor.
    ///
    /// # Errors
    /// Returns `LinkError::Io` if the supervisor thread cannot be spawned.
    pub fn new(config: LinkConfig) -> Result<Self, LinkError> {
        let inner = Arc::new(LinkInner {
            control: ControlChannel::new(config.control.clone()),
            streaming: StreamingChannel::new(config.streaming.clone()),
            config,
            phase: RwLock::new(LinkPhase::Disconnected),
            cancel: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            jog: Mutex::new(None),
        });

        let (tx, rx) = mpsc::channel();
        let supervisor_inner = Arc::clone(&inner);
        let supervisor = thread::Builder::new()
            .name("link-supervisor".to_string())
            .spawn(move || supervise(supervisor_inner, rx))?;

        let control_tx = tx.clone();
        let control_id = inner.control.events().add_listener(move |event| {
            let _ = control_tx.send(SupervisorMsg::Connection(event));
        });
        let streaming_tx = tx.clone();
        let streaming_id = inner.streaming.events().add_listener(move |event| {
            let _ = streaming_tx.send(SupervisorMsg::Connection(event));
        });

        Ok(Self {
            inner,
            supervisor_tx: tx,
            supervisor: Some(supervisor),
            listeners: [
                (ChannelKind::Control, control_id),
                (ChannelKind::Streaming, streaming_id),
            ],
        })
    }

    /// Start the connect sequence on a background thread.
    ///
    /// # Errors
    /// `HandshakeError::Busy` if a sequence is already running.
    pub fn connect(&self) -> Result<JoinHandle<Result<(), HandshakeError>>, HandshakeError> {
        self.inner.begin_handshake()?;
        let inner = Arc::clone(&self.inner);
        thread::Builder::new()
            .name("link-connect".to_string())
            .spawn(move || inner.run_handshake())
            .map_err(|e| {
                error!("Could not spawn connect thread: {}", e);
                self.inner.in_progress.store(false, Ordering::SeqCst);
                HandshakeError::Spawn(e.to_string())
            })
    }

    /// Run the connect sequence on the calling thread.
    pub fn connect_blocking(&self) -> Result<(), HandshakeError> {
        self.inner.begin_handshake()?;
        self.inner.run_handshake()
    }

    /// Cancel a running connect sequence and stop both channels.
    pub fn disconnect(&self) {
        info!("Disconnecting");
        self.inner.cancel.store(true, Ordering::SeqCst);
        self.inner.streaming.stop();
        self.inner.control.stop();
        self.inner.set_phase(LinkPhase::Disconnected);
    }

    /// True while a connect sequence runs.
    pub fn is_connecting(&self) -> bool {
        self.inner.in_progress.load(Ordering::SeqCst)
    }

    /// Current phase.
    pub fn phase(&self) -> LinkPhase {
        *self.inner.phase.read()
    }

    /// Summary of both channels.
    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            phase: self.phase(),
            control_running: self.inner.control.is_running(),
            streaming_running: self.inner.streaming.is_running(),
            control: self.inner.control.state(),
        }
    }

    /// Control channel.
    pub fn control(&self) -> &ControlChannel {
        &self.inner.control
    }

    /// Streaming channel.
    pub fn streaming(&self) -> &StreamingChannel {
        &self.inner.streaming
    }

    /// Configuration the link was created with.
    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    /// Jog generator whose fractions are zeroed on every connection change.
    pub fn set_jog_source(&self, jog: Option<Arc<Mutex<JogSource>>>) {
        *self.inner.jog.lock() = jog;
    }
}

impl Drop for LinkOrchestrator {
    fn drop(&mut self) {
        for (channel, id) in self.listeners {
            match channel {
                ChannelKind::Control => self.inner.control.events().remove_listener(id),
                ChannelKind::Streaming => self.inner.streaming.events().remove_listener(id),
            };
        }
        self.disconnect();
        let _ = self.supervisor_tx.send(SupervisorMsg::Shutdown);
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
    }
}
