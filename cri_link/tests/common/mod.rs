//! In-process fake controller speaking both link protocols.
//!
//! The control side answers state queries from a small state machine; the
//! streaming side records every target and answers with a full feedback
//! frame that mirrors the target (an ideal robot), or with a fixed pose.

#![allow(dead_code)]

use cri_common::config::{HandshakeConfig, LinkConfig};
use cri_common::position::PositionSet;
use cri_link::framing::{split_sequence, FrameBuffer, FrameMarkers, CONTROL_MARKERS, STREAM_MARKERS};
use cri_link::streaming::{parse_feedback, Feedback};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How the fake reacts to interface requests.
#[derive(Debug, Clone, Copy)]
pub struct Behavior {
    /// `CONFIG SetPositionInterface true` starts the interface.
    pub interface_starts: bool,
    /// `CMD UsePositionInterface true` makes it the position source.
    pub interface_activates: bool,
    /// Advertise the streaming port in `CMD PositionInterface` replies.
    pub advertise_port: bool,
    /// Report this pose instead of echoing the target.
    pub robot_pose: Option<PositionSet>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            interface_starts: true,
            interface_activates: true,
            advertise_port: true,
            robot_pose: None,
        }
    }
}

#[derive(Default)]
struct ControllerState {
    active: bool,
    interface_running: bool,
    interface_in_use: bool,
}

struct Shared {
    behavior: Behavior,
    stop: AtomicBool,
    state: Mutex<ControllerState>,
    commands: Mutex<Vec<(u32, String)>>,
    targets: Mutex<Vec<String>>,
    control_conn: Mutex<Option<TcpStream>>,
    streaming_conn: Mutex<Option<TcpStream>>,
    streaming_accepts: AtomicUsize,
    streaming_port: u16,
}

/// Fake controller bound to two loopback ports.
pub struct FakeController {
    shared: Arc<Shared>,
    /// Control protocol port.
    pub control_port: u16,
    /// Streaming protocol port.
    pub streaming_port: u16,
    handles: Vec<JoinHandle<()>>,
}

impl FakeController {
    pub fn start(behavior: Behavior) -> Self {
        let control = TcpListener::bind("127.0.0.1:0").unwrap();
        let streaming = TcpListener::bind("127.0.0.1:0").unwrap();
        control.set_nonblocking(true).unwrap();
        streaming.set_nonblocking(true).unwrap();
        let control_port = control.local_addr().unwrap().port();
        let streaming_port = streaming.local_addr().unwrap().port();

        let shared = Arc::new(Shared {
            behavior,
            stop: AtomicBool::new(false),
            state: Mutex::new(ControllerState::default()),
            commands: Mutex::new(Vec::new()),
            targets: Mutex::new(Vec::new()),
            control_conn: Mutex::new(None),
            streaming_conn: Mutex::new(None),
            streaming_accepts: AtomicUsize::new(0),
            streaming_port,
        });

        let c = Arc::clone(&shared);
        let s = Arc::clone(&shared);
        let handles = vec![
            thread::spawn(move || accept_loop(control, c, serve_control)),
            thread::spawn(move || accept_loop(streaming, s, serve_streaming)),
        ];

        Self {
            shared,
            control_port,
            streaming_port,
            handles,
        }
    }

    /// Link configuration pointing at this fake, with short timings.
    pub fn link_config(&self) -> LinkConfig {
        let mut config = LinkConfig::default();
        config.control.address = "127.0.0.1".to_string();
        config.control.port = self.control_port;
        config.control.keepalive_ms = 100;
        config.control.state_poll_ms = 100;
        config.control.read_timeout_ms = 20;
        config.streaming.interval_ms = 10;
        config.streaming.read_timeout_ms = 20;
        config.streaming.fallback_port = self.streaming_port;
        config.handshake = HandshakeConfig {
            connect_timeout_ms: 2000,
            interface_start_timeout_ms: 1000,
            interface_activate_timeout_ms: 1000,
            settle_ms: 50,
            poll_ms: 20,
        };
        config
    }

    /// Control commands received so far, with their sequence numbers.
    pub fn commands(&self) -> Vec<(u32, String)> {
        self.shared.commands.lock().clone()
    }

    /// True if `command` was received at least once.
    pub fn received(&self, command: &str) -> bool {
        self.shared.commands.lock().iter().any(|(_, c)| c == command)
    }

    /// Streaming payloads received so far.
    pub fn targets(&self) -> Vec<String> {
        self.shared.targets.lock().clone()
    }

    /// Number of accepted streaming connections.
    pub fn streaming_accepts(&self) -> usize {
        self.shared.streaming_accepts.load(Ordering::SeqCst)
    }

    /// Close the current control connection from the controller side.
    pub fn drop_control(&self) {
        if let Some(stream) = self.shared.control_conn.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for FakeController {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.drop_control();
        if let Some(stream) = self.shared.streaming_conn.lock().take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Poll `cond` every 10 ms until it holds or `timeout` passes.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, serve: fn(TcpStream, &Shared)) {
    while !shared.stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).unwrap();
                stream
                    .set_read_timeout(Some(Duration::from_millis(20)))
                    .unwrap();
                serve(stream, &shared);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(_) => break,
        }
    }
}

/// Read frames until the peer closes or the fake stops.
fn read_frames<F>(mut stream: &TcpStream, shared: &Shared, markers: FrameMarkers, mut on_payload: F)
where
    F: FnMut(&str) -> bool,
{
    let mut frames = FrameBuffer::new(markers);
    let mut chunk = [0u8; 4096];
    while !shared.stop.load(Ordering::SeqCst) {
        match stream.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => {
                for payload in frames.push_bytes(&chunk[..n]) {
                    if !on_payload(payload.as_str()) {
                        return;
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(_) => return,
        }
    }
}

fn serve_control(stream: TcpStream, shared: &Shared) {
    *shared.control_conn.lock() = stream.try_clone().ok();
    let mut writer = stream.try_clone().unwrap();
    let mut reply_seq = 0u32;
    let mut reply = |body: String| {
        reply_seq += 1;
        let frame = CONTROL_MARKERS.encode(&format!("{reply_seq} {body}"));
        writer.write_all(frame.as_bytes()).is_ok()
    };

    reply("STATUS MODE joint ERROR NoError".to_string());

    read_frames(&stream, shared, CONTROL_MARKERS, |payload| {
        let Some((seq, command)) = split_sequence(payload) else {
            return true;
        };
        shared.commands.lock().push((seq, command.to_string()));

        let body = {
            let mut state = shared.state.lock();
            match command {
                "QUIT" => return false,
                "CMD GetActive" => Some(format!("CMD Active {}", state.active)),
                "CMD SetActive true" => {
                    state.active = true;
                    Some("CMD Active true".to_string())
                }
                "CMD GetPositionInterface" => {
                    let port = if shared.behavior.advertise_port {
                        format!(" {}", shared.streaming_port)
                    } else {
                        String::new()
                    };
                    Some(format!(
                        "CMD PositionInterface {} {}{}",
                        state.interface_running, state.interface_in_use, port
                    ))
                }
                "CONFIG SetPositionInterface true" => {
                    if shared.behavior.interface_starts {
                        state.interface_running = true;
                    }
                    Some(format!("CONFIG PositionInterface {}", state.interface_running))
                }
                "CMD UsePositionInterface true" => {
                    if shared.behavior.interface_activates && state.interface_running {
                        state.interface_in_use = true;
                    }
                    None
                }
                _ => None,
            }
        };
        match body {
            Some(body) => reply(body),
            None => true,
        }
    });

    shared.control_conn.lock().take();
    *shared.state.lock() = ControllerState::default();
}

fn serve_streaming(stream: TcpStream, shared: &Shared) {
    shared.streaming_accepts.fetch_add(1, Ordering::SeqCst);
    *shared.streaming_conn.lock() = stream.try_clone().ok();
    let mut writer = stream.try_clone().unwrap();

    read_frames(&stream, shared, STREAM_MARKERS, |payload| {
        shared.targets.lock().push(payload.to_string());
        let pose = match parse_feedback(payload) {
            Feedback::Position(pose) => shared.behavior.robot_pose.unwrap_or(pose),
            _ => return true,
        };
        writer.write_all(feedback_frame(&pose).as_bytes()).is_ok()
    });

    shared.streaming_conn.lock().take();
}

/// Full feedback frame for `pose`.
pub fn feedback_frame(pose: &PositionSet) -> String {
    let j = pose.joints;
    let c = pose.cartesian();
    STREAM_MARKERS.encode(&format!(
        "Pos J {} {} {} {} {} {} E {} {} {} C {} {} {} {} {} {} P {} {} {}",
        j[0], j[1], j[2], j[3], j[4], j[5], j[6], j[7], j[8],
        c[0], c[1], c[2], c[3], c[4], c[5],
        pose.platform_position[0], pose.platform_position[1], pose.platform_heading,
    ))
}
