//! Position generators feeding the streaming channel.
//!
//! A generator is asked once per send tick for the next target, given the
//! pose last reported by the controller and the time since the previous
//! tick. The streaming channel holds at most one generator; with none set it
//! echoes the current pose, which holds the robot in place. Generators are
//! not ticked until the controller has reported a pose on the connection.

use cri_common::position::PositionSet;
use parking_lot::Mutex;
use std::sync::Arc;

pub mod jog;
pub mod replay;

pub use jog::{JogMode, JogSource};
pub use replay::ReplaySource;

/// Capability to produce streaming targets.
pub trait PositionSource: Send {
    /// Next target pose.
    ///
    /// `current` is the latest feedback snapshot; `elapsed_ms` the time since
    /// the previous call.
    fn next_position(&mut self, current: &PositionSet, elapsed_ms: f64) -> PositionSet;

    /// Called before the first tick that follows fresh feedback: after each
    /// (re)connect and after the generator is installed on a live channel.
    fn resync(&mut self, _current: &PositionSet) {}

    /// Short name for logs and status output.
    fn name(&self) -> &'static str;
}

/// Generator shared between the streaming channel and its owner.
///
/// The owner keeps a clone to adjust jog fractions or control playback while
/// the channel ticks it.
pub type SharedSource = Arc<Mutex<dyn PositionSource>>;

/// Wrap a generator for use with
/// [`StreamingChannel::set_position_source`](crate::streaming::StreamingChannel::set_position_source).
pub fn shared<S: PositionSource + 'static>(source: S) -> Arc<Mutex<S>> {
    Arc::new(Mutex::new(source))
}
