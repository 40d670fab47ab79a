//! Error types of the link layer.
//!
//! Channel operations never surface these to their callers; they are logged
//! and the channel degrades to "not running". Only the connect sequence and
//! the replay file reader return them.

use crate::orchestrator::LinkPhase;
use std::path::PathBuf;
use thiserror::Error;

/// Socket-level failures inside a channel.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Port outside 0..=65535.
    #[error("invalid port number {0}")]
    InvalidPort(i64),

    /// Host name did not resolve to any address.
    #[error("could not resolve {0}")]
    Resolve(String),

    /// Connect, read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the connection.
    #[error("connection closed by peer")]
    Closed,
}

/// Why a connect sequence was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// A phase did not reach its goal state in time.
    #[error("{phase:?} timed out after {timeout_ms} ms")]
    Timeout {
        /// Phase that was waiting.
        phase: LinkPhase,
        /// Configured limit.
        timeout_ms: u64,
    },

    /// `disconnect()` was called while the sequence was running.
    #[error("connect sequence cancelled during {0:?}")]
    Cancelled(LinkPhase),

    /// A channel dropped its connection mid-sequence.
    #[error("connection lost during {0:?}")]
    ConnectionLost(LinkPhase),

    /// Another connect sequence is already running.
    #[error("a connect sequence is already in progress")]
    Busy,

    /// The connect thread could not be started.
    #[error("could not spawn connect thread: {0}")]
    Spawn(String),
}

/// Failures while loading a replay file.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// File could not be opened or read.
    #[error("could not read {path:?}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A numeric field did not parse.
    #[error("line {line}: invalid number '{field}'")]
    InvalidNumber {
        /// 1-based line number.
        line: usize,
        /// Offending field text.
        field: String,
    },
}
