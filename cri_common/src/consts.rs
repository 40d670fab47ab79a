//! Protocol and link constants for the CRI workspace.
//!
//! Single source of truth for wire markers, default ports, buffer limits
//! and timer periods, imported by every crate.

/// Number of joint slots in a `PositionSet` (6 robot joints + 3 external).
pub const JOINT_COUNT: usize = 9;

/// Number of robot joints (the first slots of `PositionSet::joints`).
pub const ROBOT_JOINT_COUNT: usize = 6;

/// Number of external axes (the trailing slots of `PositionSet::joints`).
pub const EXTERNAL_JOINT_COUNT: usize = JOINT_COUNT - ROBOT_JOINT_COUNT;

/// Default controller address.
pub const DEFAULT_ADDRESS: &str = "192.168.3.11";

/// Default TCP port of the control (CRI) protocol.
pub const CRI_DEFAULT_PORT: u16 = 3920;

/// Streaming port used when the controller has not advertised one.
pub const STREAMING_FALLBACK_PORT: u16 = 3921;

/// Frame start marker of the control protocol.
pub const CRI_FRAME_START: &str = "CRISTART";

/// Frame end marker of the control protocol.
pub const CRI_FRAME_END: &str = "CRIEND";

/// Frame start marker of the streaming protocol.
pub const STREAM_FRAME_START: &str = "MSGSTART";

/// Frame end marker of the streaming protocol.
pub const STREAM_FRAME_END: &str = "MSGEND";

/// Maximum number of characters retained in a receive buffer.
pub const MESSAGE_BUFFER_MAX_LEN: usize = 1024;

/// Highest sequence number before wrapping back to 1.
pub const SEQUENCE_MAX: u32 = 9999;

/// Capacity of the rolling update-frequency windows.
pub const FREQUENCY_WINDOW: usize = 20;

/// Default keepalive period of the control channel (ms).
pub const DEFAULT_KEEPALIVE_MS: u64 = 500;

/// Default state-poll period of the control channel (ms).
pub const DEFAULT_STATE_POLL_MS: u64 = 500;

/// Default position send interval of the streaming channel (ms).
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 100;

/// Error code reported while no control connection exists.
pub const ERROR_CODE_NOT_CONNECTED: &str = "Not Connected";
