//! # CRI Link Console
//!
//! Headless operator console: connects to a robot controller, streams
//! positions from the selected generator and prints a status line until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Connect and hold the current pose
//! cri_link --address 192.168.3.11
//!
//! # Jog joint 1 at 20 % of 10 deg/s
//! cri_link --config config/link.toml --source jog --jog 0.2
//!
//! # Replay a recorded motion in a loop
//! cri_link --source replay --replay-file motion.csv --repeat
//!
//! # Verbose JSON logs
//! cri_link -v --json
//! ```

#![deny(warnings)]

use clap::{Parser, ValueEnum};
use cri_common::config::{parse_or_default, ConfigLoader, LinkConfig};
use cri_common::consts::{CRI_DEFAULT_PORT, DEFAULT_SEND_INTERVAL_MS, JOINT_COUNT};
use cri_link::source::shared;
use cri_link::{
    HandshakeError, JogSource, LinkOrchestrator, LinkPhase, LinkStatus, ReplaySource,
    SharedSource, StreamingSnapshot,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Position generator selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Echo the current pose (hold).
    #[value(name = "none")]
    Hold,
    /// Velocity jog.
    Jog,
    /// File replay.
    Replay,
}

/// CRI Link - robot controller link console
#[derive(Parser, Debug)]
#[command(name = "cri_link")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Connects to a robot controller and streams target positions")]
#[command(long_about = None)]
struct Args {
    /// Path to link configuration (link.toml). Defaults apply without it.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Controller address, overrides [control] address
    #[arg(short, long)]
    address: Option<String>,

    /// Control (CRI) port, overrides [control] port
    #[arg(short, long)]
    port: Option<String>,

    /// Position send interval in ms, overrides [streaming] interval_ms
    #[arg(short, long)]
    interval: Option<String>,

    /// Position generator
    #[arg(short, long, value_enum, default_value_t = SourceKind::Hold)]
    source: SourceKind,

    /// Joint jog fractions in [-1, 1], comma separated (up to 9)
    #[arg(long, value_name = "F,F,..")]
    jog: Option<String>,

    /// Jog velocity for all axes (units per second)
    #[arg(long)]
    velocity: Option<f64>,

    /// Replay file (`J;...` / `C;...` records)
    #[arg(long, value_name = "FILE")]
    replay_file: Option<PathBuf>,

    /// Restart the replay at the end of the file
    #[arg(long)]
    repeat: bool,

    /// Send an error reset once the link is active
    #[arg(long)]
    reset_errors: bool,

    /// Enable the motors once the link is active
    #[arg(long)]
    enable_motors: bool,

    /// Status print period in ms (0 disables)
    #[arg(long, default_value_t = 1000)]
    status_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and status in JSON format
    #[arg(long)]
    json: bool,
}

/// Status line in `--json` mode.
#[derive(Serialize)]
struct StatusReport<'a> {
    status: &'a str,
    link: &'a LinkStatus,
    streaming: &'a StreamingSnapshot,
}

/// Generator kept by the console for post-connect adjustments.
enum ActiveSource {
    Hold,
    Jog(Arc<Mutex<JogSource>>, [f64; JOINT_COUNT]),
    Replay(Arc<Mutex<ReplaySource>>),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("CRI link failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = args.config.as_deref().map(LinkConfig::load);
    let base_level = match &loaded {
        Some(Ok(config)) => config.shared.log_level.as_directive(),
        _ => "info",
    };
    setup_tracing(&args, base_level);

    info!("CRI Link v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            warn!("Could not load {:?}: {}. Using defaults.", args.config, e);
            LinkConfig::default()
        }
        None => LinkConfig::default(),
    };
    apply_overrides(&mut config, &args);
    let config = config.sanitized();
    info!(
        "[{}] Controller {}:{}, interval {} ms",
        config.shared.service_name,
        config.control.address,
        config.control.port,
        config.streaming.interval_ms
    );

    let link = LinkOrchestrator::new(config.clone())?;
    let source = install_source(&link, &config, &args);

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut handshake = Some(link.connect()?);
    let status_period = Duration::from_millis(args.status_ms);
    let mut last_status = Instant::now();

    while running.load(Ordering::SeqCst) {
        if handshake.as_ref().is_some_and(JoinHandle::is_finished) {
            let result = handshake.take().map(join_handshake);
            match result {
                Some(Ok(())) => on_link_active(&link, &source, &args),
                Some(Err(e)) => {
                    error!("Connect sequence failed: {}", e);
                    break;
                }
                None => {}
            }
        }
        if handshake.is_none() && link.phase() != LinkPhase::Active {
            warn!("Link lost");
            break;
        }

        if !status_period.is_zero() && last_status.elapsed() >= status_period {
            print_status(&link, args.json)?;
            last_status = Instant::now();
        }
        thread::sleep(Duration::from_millis(20));
    }

    link.disconnect();
    if let Some(handle) = handshake.take() {
        let _ = join_handshake(handle);
    }
    print_status(&link, args.json)?;

    info!("CRI Link shutdown complete");
    Ok(())
}

fn join_handshake(handle: JoinHandle<Result<(), HandshakeError>>) -> Result<(), HandshakeError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(HandshakeError::Spawn("connect thread panicked".to_string())))
}

/// Command-line values win over the config file.
fn apply_overrides(config: &mut LinkConfig, args: &Args) {
    if let Some(address) = &args.address {
        config.control.address = address.clone();
    }
    if let Some(port) = &args.port {
        config.control.port = parse_or_default(port, "CRI port", CRI_DEFAULT_PORT);
    }
    if let Some(interval) = &args.interval {
        config.streaming.interval_ms =
            parse_or_default(interval, "interval", DEFAULT_SEND_INTERVAL_MS).max(1);
    }
    if let Some(velocity) = args.velocity {
        config.jog.joint_velocity = velocity;
        config.jog.linear_velocity = velocity;
        config.jog.angular_velocity = velocity;
    }
}

/// Parse `--jog`; missing or unparsable entries are zero.
fn parse_jog(input: Option<&str>) -> [f64; JOINT_COUNT] {
    let mut fractions = [0.0; JOINT_COUNT];
    if let Some(input) = input {
        for (slot, part) in fractions.iter_mut().zip(input.split(',')) {
            *slot = parse_or_default(part, "jog fraction", 0.0);
        }
    }
    fractions
}

fn install_source(link: &LinkOrchestrator, config: &LinkConfig, args: &Args) -> ActiveSource {
    match args.source {
        SourceKind::Hold => ActiveSource::Hold,
        SourceKind::Jog => {
            let jog = shared(JogSource::new(config.jog));
            link.set_jog_source(Some(Arc::clone(&jog)));
            let handle: SharedSource = jog.clone();
            link.streaming().set_position_source(Some(handle));
            ActiveSource::Jog(jog, parse_jog(args.jog.as_deref()))
        }
        SourceKind::Replay => {
            let Some(path) = &args.replay_file else {
                warn!("--source replay without --replay-file, holding position");
                return ActiveSource::Hold;
            };
            let mut replay = ReplaySource::new(path);
            replay.set_repeat(args.repeat);
            let replay = shared(replay);
            let handle: SharedSource = replay.clone();
            link.streaming().set_position_source(Some(handle));
            ActiveSource::Replay(replay)
        }
    }
}

fn on_link_active(link: &LinkOrchestrator, source: &ActiveSource, args: &Args) {
    info!("Link active: {}", link.status());
    if args.reset_errors {
        link.control().send_reset_errors();
    }
    if args.enable_motors {
        link.control().send_enable_motors();
    }

    match source {
        ActiveSource::Hold => {}
        ActiveSource::Jog(jog, fractions) => {
            jog.lock().set_joint_jog(*fractions);
        }
        ActiveSource::Replay(replay) => replay.lock().start(),
    }
}

fn print_status(link: &LinkOrchestrator, json: bool) -> Result<(), serde_json::Error> {
    let status = link.status();
    let snapshot = link.streaming().snapshot();
    let text = status.to_string();

    if json {
        let report = StatusReport {
            status: &text,
            link: &status,
            streaming: &snapshot,
        };
        println!("{}", serde_json::to_string(&report)?);
    } else if snapshot.running {
        println!("[{}] {}", status.phase, text);
        println!(
            "  current ({:.1} ms): {}",
            snapshot.current_period_ms, snapshot.current
        );
        println!(
            "  target  ({:.1} ms): {}",
            snapshot.target_period_ms, snapshot.last_target
        );
    } else {
        println!("[{}] {}", status.phase, text);
    }
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, base_level: &str) {
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level))
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
