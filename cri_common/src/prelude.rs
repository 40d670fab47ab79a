//! Prelude module for common re-exports.
//!
//! `use cri_common::prelude::*;` brings in the most important types without
//! listing individual paths.

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    parse_or_default, ConfigError, ConfigLoader, ControlConfig, HandshakeConfig, JogConfig,
    LinkConfig, SharedConfig, StreamingConfig,
};

// ─── Protocol Constants ─────────────────────────────────────────────
pub use crate::consts::{CRI_DEFAULT_PORT, JOINT_COUNT, MESSAGE_BUFFER_MAX_LEN};

// ─── Pose ───────────────────────────────────────────────────────────
pub use crate::position::PositionSet;
