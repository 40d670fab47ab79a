//! # CRI Link Library
//!
//! Client side of a robot controller's remote interface: a low-rate control
//! channel, a high-rate position streaming channel and the connect sequence
//! that brings both up in the order the controller expects.
//!
//! # Module Structure
//!
//! - [`control`] - Control (CRI) channel: commands, keepalive, state poll
//! - [`streaming`] - Position streaming channel and its wire format
//! - [`orchestrator`] - Connect sequence and link supervision
//! - [`source`] - Position generators (jog, file replay)
//! - [`framing`] - Text frame codec and sequence counter
//! - [`events`] - Connection-change notifications
//! - [`frequency`] - Rolling update-interval statistics
//! - [`timer`] - Periodic background callbacks
//! - [`connection`] - Socket plumbing shared by both channels
//! - [`error`] - Error types
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        LinkOrchestrator                          │
//! │   connect sequence ──► phases ──► supervisor (event queue)       │
//! │  ┌──────────────────────┐        ┌───────────────────────────┐   │
//! │  │   ControlChannel     │        │    StreamingChannel       │   │
//! │  │  CRISTART..CRIEND    │        │    MSGSTART..MSGEND       │   │
//! │  │  keepalive, poll     │        │    send timer ◄── source  │   │
//! │  └──────────┬───────────┘        └─────────────┬─────────────┘   │
//! └─────────────┼──────────────────────────────────┼─────────────────┘
//!               ▼                                  ▼
//!         controller :3920               controller :<advertised>
//! ```

#![deny(warnings)]
#![deny(missing_docs)]

pub mod connection;
pub mod control;
pub mod error;
pub mod events;
pub mod framing;
pub mod frequency;
pub mod orchestrator;
pub mod source;
pub mod streaming;
pub mod timer;

// Re-export key types for convenience
pub use crate::control::{ControlChannel, ControlState};
pub use crate::error::{HandshakeError, LinkError, ReplayError};
pub use crate::events::{ChannelKind, ConnectionEvent, EventHub};
pub use crate::orchestrator::{LinkOrchestrator, LinkPhase, LinkStatus};
pub use crate::source::{JogMode, JogSource, PositionSource, ReplaySource, SharedSource};
pub use crate::streaming::{StreamingChannel, StreamingSnapshot};
