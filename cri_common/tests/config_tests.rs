//! Link configuration file tests.
//!
//! Loads `link.toml` files through `ConfigLoader`: full and partial files,
//! missing files, syntax errors and sanitizing of out-of-range values.

use cri_common::config::{ConfigError, ConfigLoader, LinkConfig, LogLevel};
use cri_common::consts::{CRI_DEFAULT_PORT, DEFAULT_ADDRESS, STREAMING_FALLBACK_PORT};
use std::fs;
use tempfile::TempDir;

fn write_link_toml(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("link.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_full_file() {
    let dir = TempDir::new().unwrap();
    let path = write_link_toml(
        &dir,
        r#"
[shared]
log_level = "debug"
service_name = "cell-3"

[control]
address = "10.0.0.7"
port = 4920
keepalive_ms = 250
state_poll_ms = 750

[streaming]
interval_ms = 20
fallback_port = 4921

[handshake]
connect_timeout_ms = 3000
interface_start_timeout_ms = 8000
interface_activate_timeout_ms = 2000
settle_ms = 500
poll_ms = 150

[jog]
joint_velocity = 5.0
linear_velocity = 50.0
angular_velocity = 15.0
"#,
    );

    let config = LinkConfig::load(&path).unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Debug);
    assert_eq!(config.shared.service_name, "cell-3");
    assert_eq!(config.control.address, "10.0.0.7");
    assert_eq!(config.control.port, 4920);
    assert_eq!(config.control.keepalive_ms, 250);
    assert_eq!(config.control.state_poll_ms, 750);
    assert_eq!(config.streaming.interval_ms, 20);
    assert_eq!(config.streaming.fallback_port, 4921);
    assert_eq!(config.handshake.interface_start_timeout_ms, 8000);
    assert_eq!(config.handshake.settle_ms, 500);
    assert_eq!(config.handshake.poll_ms, 150);
    assert_eq!(config.jog.linear_velocity, 50.0);
}

#[test]
fn test_partial_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_link_toml(&dir, "[control]\naddress = \"robot.local\"\n");

    let config = LinkConfig::load(&path).unwrap();
    assert_eq!(config.control.address, "robot.local");
    assert_eq!(config.control.port, CRI_DEFAULT_PORT);
    assert_eq!(config.streaming.fallback_port, STREAMING_FALLBACK_PORT);
    assert_eq!(config.handshake.connect_timeout_ms, 2000);
    assert_eq!(config.shared.log_level, LogLevel::Info);
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = LinkConfig::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}

#[test]
fn test_syntax_error() {
    let dir = TempDir::new().unwrap();
    let path = write_link_toml(&dir, "[control\nport = 1");
    assert!(matches!(LinkConfig::load(&path), Err(ConfigError::ParseError(_))));
}

#[test]
fn test_out_of_range_port_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_link_toml(&dir, "[control]\nport = 70000\n");
    assert!(matches!(LinkConfig::load(&path), Err(ConfigError::ParseError(_))));
}

#[test]
fn test_sanitized_zero_values() {
    let dir = TempDir::new().unwrap();
    let path = write_link_toml(
        &dir,
        "[control]\nport = 0\nkeepalive_ms = 0\n[streaming]\ninterval_ms = 0\n[handshake]\npoll_ms = 0\n",
    );

    let config = LinkConfig::load(&path).unwrap().sanitized();
    assert_eq!(config.control.port, CRI_DEFAULT_PORT);
    assert_eq!(config.control.keepalive_ms, 500);
    assert_eq!(config.streaming.interval_ms, 1);
    assert_eq!(config.handshake.poll_ms, 100);
    assert_eq!(config.control.address, DEFAULT_ADDRESS);
}
