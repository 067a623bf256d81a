//! Payload to frame transformation.
//!
//! Pure functions that cut an application payload into one or more wire
//! frames. Full messages are split according to a [`FragmentPolicy`];
//! explicit fragments arrive already cut by the caller and are only wrapped
//! with the right opcode and FIN flag.
//!
//! All slicing goes through `Bytes::slice`, so fragments share the caller's
//! buffer without copying.

use bytes::Bytes;

use super::frame::Frame;
use super::wire_format::OpCode;

/// How a full message payload is cut into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentPolicy {
    /// Write the whole payload as a single final frame.
    SingleFrame,
    /// Split into fragments of at most this many payload bytes.
    MaxPayload(usize),
}

impl Default for FragmentPolicy {
    fn default() -> Self {
        FragmentPolicy::SingleFrame
    }
}

/// Encode a full message into an ordered frame sequence.
///
/// The concatenated payloads of the returned frames equal `payload`.
/// The first frame carries `opcode`, subsequent frames are continuations,
/// and only the last frame has FIN set. An empty payload produces one
/// empty final frame.
pub fn encode_message(opcode: OpCode, payload: Bytes, policy: FragmentPolicy) -> Vec<Frame> {
    debug_assert!(opcode.is_data());

    let chunk = match policy {
        FragmentPolicy::SingleFrame => return vec![Frame::fragment(opcode, payload, true)],
        FragmentPolicy::MaxPayload(max) if max == 0 || payload.len() <= max => {
            return vec![Frame::fragment(opcode, payload, true)];
        }
        FragmentPolicy::MaxPayload(max) => max,
    };

    let mut frames = Vec::with_capacity(payload.len().div_ceil(chunk));
    let mut offset = 0;
    while offset < payload.len() {
        let end = usize::min(offset + chunk, payload.len());
        let fin = end == payload.len();
        let frame_opcode = if offset == 0 {
            opcode
        } else {
            OpCode::Continuation
        };
        frames.push(Frame::fragment(frame_opcode, payload.slice(offset..end), fin));
        offset = end;
    }
    frames
}

/// Wrap an explicitly cut fragment as a single frame.
///
/// The first fragment of a message carries the initiating `opcode`;
/// every later fragment is a continuation. `is_last` sets FIN and closes
/// the fragmented message. Zero-length fragments are legal, including as
/// the final one.
pub fn encode_fragment(opcode: OpCode, is_first: bool, payload: Bytes, is_last: bool) -> Frame {
    debug_assert!(matches!(opcode, OpCode::Text | OpCode::Binary));

    let frame_opcode = if is_first {
        opcode
    } else {
        OpCode::Continuation
    };
    Frame::fragment(frame_opcode, payload, is_last)
}
