//! Position streaming channel.
//!
//! High-rate TCP client of the controller's position interface. Every send
//! tick a target pose is written; the controller answers with the actual
//! pose, which becomes the input of the next tick.
//!
//! # Data flow
//!
//! ```text
//!              ┌────────────── pos-send timer ───────────────┐
//!              │ current ─► PositionSource ─► last_target ─► socket
//!              └──────▲──────────────────────────────────────┘
//!                     │
//!  socket ─► pos-read ─► parse_feedback ─► current (whole-value replace)
//! ```
//!
//! The generator is only consulted once the controller has reported a pose
//! on the current connection; it is resynced to that pose first.
//!
//! Readers get whole copies through [`StreamingChannel::snapshot`]; no field
//! of a pose is ever updated in place behind their back.

use crate::connection::{close_stream, open_stream, pump_frames, validate_port};
use crate::error::LinkError;
use crate::events::{ChannelKind, EventHub};
use crate::frequency::UpdateMeter;
use crate::framing::{FrameBuffer, STREAM_MARKERS};
use crate::source::SharedSource;
use crate::timer::PeriodicTimer;
use cri_common::config::StreamingConfig;
use cri_common::consts::{EXTERNAL_JOINT_COUNT, ROBOT_JOINT_COUNT};
use cri_common::position::PositionSet;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::Serialize;
use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

// ─── Wire format ────────────────────────────────────────────────────

/// Serialize a target pose into a complete streaming frame.
///
/// `J` frames carry robot joints, `C` frames the cartesian pose; both carry
/// the external axes after `E` and the platform after `P`.
pub fn encode_target(target: &PositionSet) -> String {
    let (kind, main) = if target.is_cartesian {
        ('C', target.cartesian())
    } else {
        let mut joints = [0.0; ROBOT_JOINT_COUNT];
        joints.copy_from_slice(target.robot_joints());
        ('J', joints)
    };
    let ext = target.external_joints();

    STREAM_MARKERS.encode(&format!(
        "Pos {} {} {} {} {} {} {} E {} {} {} P {} {} {}",
        kind,
        main[0],
        main[1],
        main[2],
        main[3],
        main[4],
        main[5],
        ext[0],
        ext[1],
        ext[2],
        target.platform_position[0],
        target.platform_position[1],
        target.platform_heading,
    ))
}

/// One inbound streaming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    /// Actual pose.
    Position(PositionSet),
    /// Acknowledgement.
    Ok,
    /// Controller-side error, with whatever text followed the keyword.
    Error(String),
    /// Anything else.
    Unknown,
}

#[derive(Clone, Copy)]
enum Group {
    RobotJoints,
    ExternalJoints,
    Cartesian,
    Platform,
}

fn is_numeric_token(token: &str) -> bool {
    token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '.')
}

/// Parse the `Pos` body. Group labels switch the fill target; numbers fill
/// the active group in order.
fn parse_pose<'a>(tokens: impl Iterator<Item = &'a str>) -> PositionSet {
    let mut robot = [0.0; ROBOT_JOINT_COUNT];
    let mut external = [0.0; EXTERNAL_JOINT_COUNT];
    let mut cartesian = [0.0; 6];
    let mut platform = [0.0; 3];

    let mut group: Option<Group> = None;
    let mut idx = 0;
    for token in tokens {
        let label = match token {
            "J" => Some(Some(Group::RobotJoints)),
            "E" => Some(Some(Group::ExternalJoints)),
            "C" => Some(Some(Group::Cartesian)),
            "P" => Some(Some(Group::Platform)),
            t if !is_numeric_token(t) => Some(None),
            _ => None,
        };
        if let Some(next) = label {
            group = next;
            idx = 0;
            continue;
        }

        let Some(active) = group else { continue };
        let target: &mut [f64] = match active {
            Group::RobotJoints => &mut robot,
            Group::ExternalJoints => &mut external,
            Group::Cartesian => &mut cartesian,
            Group::Platform => &mut platform,
        };
        if let (Some(slot), Ok(value)) = (target.get_mut(idx), token.parse::<f64>()) {
            *slot = value;
        }
        idx += 1;
    }

    let mut pose = PositionSet::default();
    pose.joints[..ROBOT_JOINT_COUNT].copy_from_slice(&robot);
    pose.set_external_joints(external);
    pose.cartesian_position.copy_from_slice(&cartesian[..3]);
    pose.cartesian_orientation.copy_from_slice(&cartesian[3..]);
    pose.platform_position = [platform[0], platform[1]];
    pose.platform_heading = platform[2];
    pose
}

/// Classify and parse one streaming payload.
pub fn parse_feedback(payload: &str) -> Feedback {
    let mut tokens = payload.split_whitespace();
    match tokens.next() {
        Some("Pos") => Feedback::Position(parse_pose(tokens)),
        Some("OK") => Feedback::Ok,
        Some("ERROR") => Feedback::Error(tokens.collect::<Vec<_>>().join(" ")),
        _ => Feedback::Unknown,
    }
}

// ─── Channel state ──────────────────────────────────────────────────

/// Copy of the channel's observable state.
#[derive(Debug, Clone, Serialize)]
pub struct StreamingSnapshot {
    /// Socket connected and not stopping.
    pub running: bool,
    /// Latest pose reported by the controller.
    pub current: PositionSet,
    /// Latest pose sent.
    pub last_target: PositionSet,
    /// Mean interval between received poses (ms).
    pub current_period_ms: f64,
    /// Mean interval between sent targets (ms).
    pub target_period_ms: f64,
}

struct Poses {
    current: PositionSet,
    last_target: PositionSet,
    current_meter: UpdateMeter,
    target_meter: UpdateMeter,
    /// A `Pos` message arrived on this connection.
    has_feedback: bool,
    /// The generator has to be resynced to `current` before its next tick.
    resync_pending: bool,
}

impl Poses {
    /// Forget the previous connection's feedback.
    fn restart(&mut self, now: Instant) {
        self.current = PositionSet::default();
        self.has_feedback = false;
        self.resync_pending = false;
        self.current_meter.restart(now);
        self.target_meter.restart(now);
    }
}

impl Default for Poses {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            current: PositionSet::default(),
            last_target: PositionSet::default(),
            current_meter: UpdateMeter::new(now),
            target_meter: UpdateMeter::new(now),
            has_feedback: false,
            resync_pending: false,
        }
    }
}

struct StreamingShared {
    stop: AtomicBool,
    connected: AtomicBool,
    writer: Mutex<Option<TcpStream>>,
    poses: RwLock<Poses>,
    source: Mutex<Option<SharedSource>>,
    events: EventHub,
}

impl StreamingShared {
    fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst) && self.connected.load(Ordering::SeqCst)
    }

    /// One send tick: ask the generator for the next target and write it.
    fn send_position(&self) {
        if !self.is_running() {
            return;
        }

        let (current, elapsed_ms, has_feedback, resync) = {
            let mut poses = self.poses.write();
            let elapsed = poses.target_meter.record(Instant::now());
            let resync = std::mem::take(&mut poses.resync_pending);
            (poses.current, elapsed, poses.has_feedback, resync)
        };
        // Clone the handle so the generator runs without the slot lock held.
        let source = self.source.lock().clone();
        let target = match &source {
            // Until the robot reports its pose the generator has no anchor.
            Some(_) if !has_feedback => current,
            Some(source) => {
                let mut source = source.lock();
                if resync {
                    source.resync(&current);
                }
                source.next_position(&current, elapsed_ms)
            }
            None => current,
        };
        self.poses.write().last_target = target;

        let frame = encode_target(&target);
        let mut writer = self.writer.lock();
        let Some(stream) = writer.as_mut() else {
            return;
        };
        if let Err(e) = stream.write_all(frame.as_bytes()) {
            error!("Position Client: Could not send position: {}", e);
            self.stop.store(true, Ordering::SeqCst);
            close_stream(stream);
        }
    }

    fn handle_payload(&self, payload: &str) {
        match parse_feedback(payload) {
            Feedback::Position(pose) => {
                let mut poses = self.poses.write();
                if !poses.has_feedback {
                    debug!("Position Client: first feedback {}", pose);
                    poses.has_feedback = true;
                    poses.resync_pending = true;
                }
                poses.current = pose;
                poses.current_meter.record(Instant::now());
            }
            Feedback::Ok => {}
            Feedback::Error(detail) => debug!("Position Client: controller error '{}'", detail),
            Feedback::Unknown => warn!("Position Client: Received unknown message: '{}'", payload),
        }
    }
}

// ─── Channel ────────────────────────────────────────────────────────

/// Client side of the position streaming protocol.
pub struct StreamingChannel {
    config: StreamingConfig,
    shared: Arc<StreamingShared>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingChannel {
    /// Create a stopped channel without a position source.
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config,
            shared: Arc::new(StreamingShared {
                stop: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                writer: Mutex::new(None),
                poses: RwLock::new(Poses::default()),
                source: Mutex::new(None),
                events: EventHub::new(ChannelKind::Streaming),
            }),
            read_task: Mutex::new(None),
        }
    }

    /// Connect to `address:port` and stream every `interval_ms`.
    ///
    /// A running connection is stopped first. Ports outside 0..=65535 are
    /// then logged and ignored, leaving the channel stopped.
    pub fn start(&self, interval_ms: u64, address: &str, port: i64) {
        let mut read_task = self.read_task.lock();
        self.stop_locked(&mut read_task);
        while read_task.is_some() {
            self.stop_locked(&mut read_task);
        }

        let port = match validate_port(port) {
            Ok(port) => port,
            Err(e) => {
                error!("Position Client: Can not connect: {}", e);
                return;
            }
        };

        info!("Position Client: Connecting to server at {}:{}", address, port);
        self.shared.stop.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let address = address.to_string();
        let interval = Duration::from_millis(interval_ms.max(1));
        match thread::Builder::new()
            .name("pos-read".to_string())
            .spawn(move || read_loop(shared, config, address, port, interval))
        {
            Ok(handle) => *read_task = Some(handle),
            Err(e) => {
                error!("Position Client: Could not spawn reader: {}", e);
                self.shared.stop.store(true, Ordering::SeqCst);
                self.shared.events.notify(false);
            }
        }
    }

    /// Stop sending, close the connection and wait for the read loop.
    ///
    /// Safe to call when not running and from any thread.
    pub fn stop(&self) {
        let mut read_task = self.read_task.lock();
        self.stop_locked(&mut read_task);
    }

    /// Joins with the lifecycle lock released; see `ControlChannel::stop`.
    fn stop_locked(&self, read_task: &mut MutexGuard<'_, Option<JoinHandle<()>>>) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(stream) = self.shared.writer.lock().as_ref() {
            close_stream(stream);
        }
        if let Some(handle) = read_task.take() {
            if handle.thread().id() != thread::current().id() {
                MutexGuard::unlocked(read_task, || {
                    let _ = handle.join();
                });
            }
        }
    }

    /// True while the socket is connected and no stop has been requested.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Install or clear the generator. `None` holds the current pose.
    ///
    /// A new generator is resynced to the robot's pose before its first tick.
    pub fn set_position_source(&self, source: Option<SharedSource>) {
        match &source {
            Some(s) => info!("Position Client: source set to '{}'", s.lock().name()),
            None => info!("Position Client: source cleared"),
        }
        *self.shared.source.lock() = source;
        let mut poses = self.shared.poses.write();
        poses.resync_pending = poses.has_feedback;
    }

    /// True once the controller reported a pose on the current connection.
    pub fn has_feedback(&self) -> bool {
        self.shared.poses.read().has_feedback
    }

    /// Installed generator, if any.
    pub fn position_source(&self) -> Option<SharedSource> {
        self.shared.source.lock().clone()
    }

    /// Latest pose reported by the controller.
    pub fn current_position(&self) -> PositionSet {
        self.shared.poses.read().current
    }

    /// Latest pose sent to the controller.
    pub fn last_target_position(&self) -> PositionSet {
        self.shared.poses.read().last_target
    }

    /// Mean interval between received poses (ms).
    pub fn current_position_period_ms(&self) -> f64 {
        self.shared.poses.read().current_meter.mean_period_ms()
    }

    /// Mean interval between sent targets (ms).
    pub fn target_position_period_ms(&self) -> f64 {
        self.shared.poses.read().target_meter.mean_period_ms()
    }

    /// Consistent copy of all observable state.
    pub fn snapshot(&self) -> StreamingSnapshot {
        let poses = self.shared.poses.read();
        StreamingSnapshot {
            running: self.shared.is_running(),
            current: poses.current,
            last_target: poses.last_target,
            current_period_ms: poses.current_meter.mean_period_ms(),
            target_period_ms: poses.target_meter.mean_period_ms(),
        }
    }

    /// Connection events of this channel.
    pub fn events(&self) -> &EventHub {
        &self.shared.events
    }
}

impl Drop for StreamingChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(
    shared: Arc<StreamingShared>,
    config: StreamingConfig,
    address: String,
    port: u16,
    interval: Duration,
) {
    if let Err(e) = run_connection(&shared, &config, &address, port, interval) {
        error!("Position Client: Reader failed: {}", e);
    }

    shared.stop.store(true, Ordering::SeqCst);
    shared.connected.store(false, Ordering::SeqCst);
    if let Some(stream) = shared.writer.lock().take() {
        close_stream(&stream);
    }
    shared.events.notify(false);
    info!("Position Client: Stopped");
}

fn run_connection(
    shared: &Arc<StreamingShared>,
    config: &StreamingConfig,
    address: &str,
    port: u16,
    interval: Duration,
) -> Result<(), LinkError> {
    let stream = open_stream(
        address,
        port,
        Duration::from_millis(config.connect_timeout_ms),
        Duration::from_millis(config.read_timeout_ms),
    )?;
    *shared.writer.lock() = Some(stream.try_clone()?);
    if shared.stop.load(Ordering::SeqCst) {
        debug!("Position Client: stop requested while connecting");
        return Ok(());
    }

    shared.poses.write().restart(Instant::now());
    shared.connected.store(true, Ordering::SeqCst);

    let sender = Arc::clone(shared);
    let mut send_timer = match PeriodicTimer::spawn("pos-send", interval, move || {
        sender.send_position()
    }) {
        Ok(timer) => Some(timer),
        Err(e) => {
            error!("Position Client: send timer unavailable: {}", e);
            None
        }
    };

    info!(
        "Position Client: connected to {}:{} ({} ms interval)",
        address,
        port,
        interval.as_millis()
    );
    shared.events.notify(true);

    let mut frames = FrameBuffer::new(STREAM_MARKERS);
    let result = pump_frames(&stream, &shared.stop, &mut frames, ChannelKind::Streaming, |payload| {
        trace!("Position Client: '{}'", payload);
        shared.handle_payload(payload)
    });

    if let Some(timer) = send_timer.as_mut() {
        timer.stop();
    }
    match result {
        Err(LinkError::Closed) => {
            info!("Position Client: connection closed by controller");
            Ok(())
        }
        other => other,
    }
}
