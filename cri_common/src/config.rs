//! Configuration loading traits and types.
//!
//! This module provides the TOML configuration tree of the robot link and a
//! standardized way to load it.
//!
//! # Usage
//!
//! ```rust,no_run
//! use cri_common::config::{ConfigLoader, LinkConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = LinkConfig::load(Path::new("link.toml"))?.sanitized();
//!     println!("Controller: {}:{}", config.control.address, config.control.port);
//!     Ok(())
//! }
//! ```
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! log_level = "debug"
//! service_name = "cri-console"
//!
//! [control]
//! address = "192.168.3.11"
//! port = 3920
//!
//! [streaming]
//! interval_ms = 50
//!
//! [handshake]
//! interface_start_timeout_ms = 10000
//! ```

use crate::consts::{
    CRI_DEFAULT_PORT, DEFAULT_ADDRESS, DEFAULT_KEEPALIVE_MS, DEFAULT_SEND_INTERVAL_MS,
    DEFAULT_STATE_POLL_MS, STREAMING_FALLBACK_PORT,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn default_service_name() -> String {
    "cri-link".to_string()
}

/// Common configuration fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}
fn default_cri_port() -> u16 {
    CRI_DEFAULT_PORT
}
fn default_keepalive_ms() -> u64 {
    DEFAULT_KEEPALIVE_MS
}
fn default_state_poll_ms() -> u64 {
    DEFAULT_STATE_POLL_MS
}
fn default_socket_connect_timeout_ms() -> u64 {
    2000
}
fn default_read_timeout_ms() -> u64 {
    50
}

/// Control channel settings (`[control]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Controller address (IP or host name).
    #[serde(default = "default_address")]
    pub address: String,
    /// Control protocol port.
    #[serde(default = "default_cri_port")]
    pub port: u16,
    /// Keepalive period in milliseconds.
    #[serde(default = "default_keepalive_ms")]
    pub keepalive_ms: u64,
    /// State-poll period in milliseconds.
    #[serde(default = "default_state_poll_ms")]
    pub state_poll_ms: u64,
    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_socket_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Socket read timeout, i.e. how often the read loop checks its stop flag.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_cri_port(),
            keepalive_ms: default_keepalive_ms(),
            state_poll_ms: default_state_poll_ms(),
            connect_timeout_ms: default_socket_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    DEFAULT_SEND_INTERVAL_MS
}
fn default_fallback_port() -> u16 {
    STREAMING_FALLBACK_PORT
}

/// Streaming channel settings (`[streaming]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Position send interval in milliseconds (minimum 1).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Port used when the controller did not advertise a streaming port.
    #[serde(default = "default_fallback_port")]
    pub fallback_port: u16,
    /// TCP connect timeout in milliseconds.
    #[serde(default = "default_socket_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Socket read timeout in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            fallback_port: default_fallback_port(),
            connect_timeout_ms: default_socket_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

fn default_hs_connect_timeout_ms() -> u64 {
    2000
}
fn default_interface_start_timeout_ms() -> u64 {
    5000
}
fn default_interface_activate_timeout_ms() -> u64 {
    5000
}
fn default_settle_ms() -> u64 {
    1000
}
fn default_poll_ms() -> u64 {
    100
}

/// Connect-sequence timing (`[handshake]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Time allowed for the control channel to come up.
    #[serde(default = "default_hs_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Time allowed for the position interface to report "running".
    #[serde(default = "default_interface_start_timeout_ms")]
    pub interface_start_timeout_ms: u64,
    /// Time allowed for the position interface to report "active".
    #[serde(default = "default_interface_activate_timeout_ms")]
    pub interface_activate_timeout_ms: u64,
    /// Delay between starting the streaming channel and requesting its use.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Period between state re-checks.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_hs_connect_timeout_ms(),
            interface_start_timeout_ms: default_interface_start_timeout_ms(),
            interface_activate_timeout_ms: default_interface_activate_timeout_ms(),
            settle_ms: default_settle_ms(),
            poll_ms: default_poll_ms(),
        }
    }
}

impl HandshakeConfig {
    /// Connect timeout as `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Interface start timeout as `Duration`.
    pub fn interface_start_timeout(&self) -> Duration {
        Duration::from_millis(self.interface_start_timeout_ms)
    }

    /// Interface activation timeout as `Duration`.
    pub fn interface_activate_timeout(&self) -> Duration {
        Duration::from_millis(self.interface_activate_timeout_ms)
    }

    /// Settle delay as `Duration`.
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Poll period as `Duration`.
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

fn default_velocity() -> f64 {
    10.0
}

/// Jog velocities (`[jog]`), in units per second at jog fraction 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JogConfig {
    /// Joint velocity (deg/s).
    #[serde(default = "default_velocity")]
    pub joint_velocity: f64,
    /// Cartesian translation velocity (mm/s).
    #[serde(default = "default_velocity")]
    pub linear_velocity: f64,
    /// Cartesian orientation velocity (deg/s).
    #[serde(default = "default_velocity")]
    pub angular_velocity: f64,
}

impl Default for JogConfig {
    fn default() -> Self {
        Self {
            joint_velocity: default_velocity(),
            linear_velocity: default_velocity(),
            angular_velocity: default_velocity(),
        }
    }
}

/// Complete configuration of the robot link.
///
/// Every section and field is optional in TOML; missing values fall back to
/// the documented defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Logging and identification.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Control channel.
    #[serde(default)]
    pub control: ControlConfig,
    /// Streaming channel.
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Connect sequence.
    #[serde(default)]
    pub handshake: HandshakeConfig,
    /// Jog generator.
    #[serde(default)]
    pub jog: JogConfig,
}

impl LinkConfig {
    /// Replace out-of-range values by their defaults.
    ///
    /// Never fails: each substitution is logged as a warning and startup
    /// continues with the default.
    pub fn sanitized(mut self) -> Self {
        if self.shared.service_name.is_empty() {
            warn!("Empty service_name, using default '{}'", default_service_name());
            self.shared.service_name = default_service_name();
        }
        if self.control.port == 0 {
            warn!("Invalid control port 0, using default {}", CRI_DEFAULT_PORT);
            self.control.port = CRI_DEFAULT_PORT;
        }
        if self.control.keepalive_ms == 0 {
            warn!("keepalive_ms must be > 0, using default {}", DEFAULT_KEEPALIVE_MS);
            self.control.keepalive_ms = DEFAULT_KEEPALIVE_MS;
        }
        if self.control.state_poll_ms == 0 {
            warn!("state_poll_ms must be > 0, using default {}", DEFAULT_STATE_POLL_MS);
            self.control.state_poll_ms = DEFAULT_STATE_POLL_MS;
        }
        if self.control.read_timeout_ms == 0 {
            warn!("control read_timeout_ms must be > 0, using default {}", default_read_timeout_ms());
            self.control.read_timeout_ms = default_read_timeout_ms();
        }
        if self.control.connect_timeout_ms == 0 {
            warn!("control connect_timeout_ms must be > 0, using default {}", default_socket_connect_timeout_ms());
            self.control.connect_timeout_ms = default_socket_connect_timeout_ms();
        }
        if self.streaming.interval_ms == 0 {
            warn!("Streaming interval must be at least 1 ms, using 1 ms");
            self.streaming.interval_ms = 1;
        }
        if self.streaming.fallback_port == 0 {
            warn!("Invalid streaming fallback port 0, using default {}", STREAMING_FALLBACK_PORT);
            self.streaming.fallback_port = STREAMING_FALLBACK_PORT;
        }
        if self.streaming.read_timeout_ms == 0 {
            warn!("streaming read_timeout_ms must be > 0, using default {}", default_read_timeout_ms());
            self.streaming.read_timeout_ms = default_read_timeout_ms();
        }
        if self.streaming.connect_timeout_ms == 0 {
            warn!("streaming connect_timeout_ms must be > 0, using default {}", default_socket_connect_timeout_ms());
            self.streaming.connect_timeout_ms = default_socket_connect_timeout_ms();
        }
        if self.handshake.poll_ms == 0 {
            warn!("handshake poll_ms must be > 0, using default {}", default_poll_ms());
            self.handshake.poll_ms = default_poll_ms();
        }
        for (name, value) in [
            ("joint_velocity", &mut self.jog.joint_velocity),
            ("linear_velocity", &mut self.jog.linear_velocity),
            ("angular_velocity", &mut self.jog.angular_velocity),
        ] {
            if !value.is_finite() || *value < 0.0 {
                warn!("Invalid jog {name} {value}, using default {}", default_velocity());
                *value = default_velocity();
            }
        }
        self
    }
}

/// Parse a user-supplied setting, falling back to `default` with a warning.
///
/// ```rust
/// use cri_common::config::parse_or_default;
///
/// assert_eq!(parse_or_default("250", "interval", 100u64), 250);
/// assert_eq!(parse_or_default("fast", "interval", 100u64), 100);
/// ```
pub fn parse_or_default<T>(input: &str, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match input.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!("Could not parse {name} '{input}', using default {default}");
            default
        }
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation: any serde-deserializable struct can be loaded.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Warn.as_directive(), "warn");
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        let parsed: TestWrapper = toml::from_str("level = \"trace\"").unwrap();
        assert_eq!(parsed.level, LogLevel::Trace);
        let parsed: TestWrapper = toml::from_str("level = \"error\"").unwrap();
        assert_eq!(parsed.level, LogLevel::Error);
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let config: LinkConfig = toml::from_str("").unwrap();
        assert_eq!(config.control.port, CRI_DEFAULT_PORT);
        assert_eq!(config.control.keepalive_ms, 500);
        assert_eq!(config.control.state_poll_ms, 500);
        assert_eq!(config.streaming.interval_ms, DEFAULT_SEND_INTERVAL_MS);
        assert_eq!(config.handshake.poll_ms, 100);
        assert_eq!(config.jog.joint_velocity, 10.0);
    }

    #[test]
    fn test_sanitized_replaces_invalid_values() {
        let mut config = LinkConfig::default();
        config.control.port = 0;
        config.streaming.interval_ms = 0;
        config.handshake.poll_ms = 0;
        config.jog.linear_velocity = f64::NAN;
        config.shared.service_name.clear();

        let config = config.sanitized();
        assert_eq!(config.shared.service_name, "cri-link");
        assert_eq!(config.control.port, CRI_DEFAULT_PORT);
        assert_eq!(config.streaming.interval_ms, 1);
        assert_eq!(config.handshake.poll_ms, 100);
        assert_eq!(config.jog.linear_velocity, 10.0);
    }

    #[test]
    fn test_parse_or_default() {
        assert_eq!(parse_or_default(" 3920 ", "port", 1u16), 3920);
        assert_eq!(parse_or_default("70000", "port", 3920u16), 3920);
        assert_eq!(parse_or_default("", "interval", 100u64), 100);
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = LinkConfig::load(Path::new("/nonexistent/path/link.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = LinkConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
