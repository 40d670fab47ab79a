//! Text framing for both link protocols.
//!
//! Neither protocol carries a length prefix. A frame is the text between a
//! start marker and an end marker:
//!
//! ```text
//! control:    CRISTART <seq> <command> CRIEND
//! streaming:  MSGSTART <body> MSGEND
//! ```
//!
//! [`FrameBuffer`] accumulates raw bytes and yields every complete payload in
//! the order found. After each pass everything up to the end of the last
//! complete frame is discarded, and the retained tail never exceeds the
//! configured limit, so an unframed peer cannot grow it without bound.

use cri_common::consts::{
    CRI_FRAME_END, CRI_FRAME_START, MESSAGE_BUFFER_MAX_LEN, SEQUENCE_MAX, STREAM_FRAME_END,
    STREAM_FRAME_START,
};

/// Start/end marker pair of a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMarkers {
    /// Start marker, followed by a space on the wire.
    pub start: &'static str,
    /// End marker, preceded by a space on the wire.
    pub end: &'static str,
}

/// Markers of the control (CRI) protocol.
pub const CONTROL_MARKERS: FrameMarkers = FrameMarkers {
    start: CRI_FRAME_START,
    end: CRI_FRAME_END,
};

/// Markers of the streaming protocol.
pub const STREAM_MARKERS: FrameMarkers = FrameMarkers {
    start: STREAM_FRAME_START,
    end: STREAM_FRAME_END,
};

impl FrameMarkers {
    /// Wrap `body` into a complete frame.
    pub fn encode(&self, body: &str) -> String {
        format!("{} {} {}", self.start, body, self.end)
    }
}

/// Wrap a control command with its sequence number.
pub fn encode_command(seq: u32, command: &str) -> String {
    CONTROL_MARKERS.encode(&format!("{seq} {command}"))
}

/// Split a control payload into its leading sequence number and the rest.
///
/// Returns `None` if the first token is not a number.
pub fn split_sequence(payload: &str) -> Option<(u32, &str)> {
    let (seq, rest) = payload.split_once(' ').unwrap_or((payload, ""));
    seq.parse().ok().map(|seq| (seq, rest))
}

/// Outbound sequence numbers of the control protocol.
///
/// The first number handed out is 2; after 9999 the counter wraps to 1.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    last: u32,
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self { last: 1 }
    }
}

impl SequenceCounter {
    /// Advance and return the next sequence number.
    pub fn next(&mut self) -> u32 {
        self.last += 1;
        if self.last > SEQUENCE_MAX {
            self.last = 1;
        }
        self.last
    }
}

/// Receive-side accumulator that extracts framed payloads.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    markers: FrameMarkers,
    buffer: String,
    max_len: usize,
}

impl FrameBuffer {
    /// Create an empty buffer bounded by [`MESSAGE_BUFFER_MAX_LEN`].
    pub fn new(markers: FrameMarkers) -> Self {
        Self::with_limit(markers, MESSAGE_BUFFER_MAX_LEN)
    }

    /// Create an empty buffer with a custom retention limit.
    pub fn with_limit(markers: FrameMarkers, max_len: usize) -> Self {
        Self {
            markers,
            buffer: String::with_capacity(max_len),
            max_len,
        }
    }

    /// Append raw socket bytes and return the payloads of all complete frames.
    ///
    /// Invalid UTF-8 is replaced rather than rejected; both protocols are ASCII.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<String> {
        self.push_str(&String::from_utf8_lossy(bytes))
    }

    /// Append text and return the payloads of all complete frames, in order.
    ///
    /// Payloads are the text between the markers with the separating
    /// whitespace stripped.
    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut payloads = Vec::new();
        let mut consumed = 0;
        while let Some(start_rel) = self.buffer[consumed..].find(self.markers.start) {
            let body_start = consumed + start_rel + self.markers.start.len();
            let Some(end_rel) = self.buffer[body_start..].find(self.markers.end) else {
                break;
            };
            let body_end = body_start + end_rel;
            payloads.push(self.buffer[body_start..body_end].trim().to_string());
            consumed = body_end + self.markers.end.len();
        }

        let mut cut = consumed;
        if self.buffer.len() > self.max_len {
            cut = cut.max(self.buffer.len() - self.max_len);
        }
        while !self.buffer.is_char_boundary(cut) {
            cut += 1;
        }
        self.buffer.drain(..cut);

        payloads
    }

    /// Retained, not yet consumed text.
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Number of retained bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop all retained text.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trip() {
        let mut seq = SequenceCounter::default();
        let mut rx = FrameBuffer::new(CONTROL_MARKERS);

        for command in ["CMD GetActive", "CONFIG SetPositionInterface true", "ALIVEJOG 0 0 0 0 0 0 0 0 0"] {
            let n = seq.next();
            let payloads = rx.push_str(&encode_command(n, command));
            assert_eq!(payloads.len(), 1);
            assert_eq!(split_sequence(&payloads[0]), Some((n, command)));
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn test_sequence_starts_at_two_and_wraps() {
        let mut seq = SequenceCounter::default();
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.next(), 3);

        let mut last = 3;
        loop {
            let n = seq.next();
            if n == 1 {
                assert_eq!(last, SEQUENCE_MAX);
                break;
            }
            assert_eq!(n, last + 1);
            last = n;
        }
        assert_eq!(seq.next(), 2);
    }

    #[test]
    fn test_buffer_is_bounded_without_frames() {
        let mut rx = FrameBuffer::new(STREAM_MARKERS);
        let garbage = "x".repeat(700);
        for _ in 0..5 {
            assert!(rx.push_str(&garbage).is_empty());
            assert!(rx.len() <= MESSAGE_BUFFER_MAX_LEN);
        }
        assert_eq!(rx.len(), MESSAGE_BUFFER_MAX_LEN);
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut rx = FrameBuffer::new(STREAM_MARKERS);
        let payloads = rx.push_str("MSGSTART OK MSGENDMSGSTART Pos J 1 2 3 4 5 6 MSGEND");
        assert_eq!(payloads, vec!["OK".to_string(), "Pos J 1 2 3 4 5 6".to_string()]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_partial_frame_is_retained() {
        let mut rx = FrameBuffer::new(STREAM_MARKERS);
        assert!(rx.push_str("MSGSTART Pos J 1 2").is_empty());
        assert_eq!(rx.as_str(), "MSGSTART Pos J 1 2");

        let payloads = rx.push_str(" 3 MSGEND MSGSTART O");
        assert_eq!(payloads, vec!["Pos J 1 2 3".to_string()]);
        assert_eq!(rx.as_str(), " MSGSTART O");

        let payloads = rx.push_str("K MSGEND");
        assert_eq!(payloads, vec!["OK".to_string()]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_leading_noise_before_frame_is_discarded() {
        let mut rx = FrameBuffer::new(CONTROL_MARKERS);
        let payloads = rx.push_str("noise CRISTART 5 CMD Active true CRIEND trailing");
        assert_eq!(payloads, vec!["5 CMD Active true".to_string()]);
        assert_eq!(rx.as_str(), " trailing");
    }

    #[test]
    fn test_invalid_utf8_does_not_break_truncation() {
        let mut rx = FrameBuffer::with_limit(STREAM_MARKERS, 16);
        let mut bytes = vec![0xFFu8; 40];
        bytes.extend_from_slice(b"MSGSTART OK MSGEND");
        let payloads = rx.push_bytes(&bytes);
        assert_eq!(payloads, vec!["OK".to_string()]);
        assert!(rx.len() <= 16);
    }

    #[test]
    fn test_split_sequence_rejects_non_numeric() {
        assert_eq!(split_sequence("abc CMD"), None);
        assert_eq!(split_sequence("7"), Some((7, "")));
    }
}
