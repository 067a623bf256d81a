//! Frame struct with typed accessors and constructors.
//!
//! Represents a complete wire frame: FIN flag, opcode, and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing between the caller,
//! the outbound queue, and the writer lane.
//!
//! # Example
//!
//! ```
//! use ws_remote::protocol::{Frame, OpCode};
//! use bytes::Bytes;
//!
//! let frame = Frame::text(Bytes::from_static(b"hello"));
//! assert_eq!(frame.opcode(), OpCode::Text);
//! assert!(frame.is_final());
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{FrameHeader, HeaderBytes, OpCode};
use crate::error::Result;

/// An immutable unit written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    fin: bool,
    /// Frame opcode.
    opcode: OpCode,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    payload: Bytes,
}

impl Frame {
    /// Create a frame, validating control-frame rules.
    pub fn new(fin: bool, opcode: OpCode, payload: Bytes) -> Result<Self> {
        FrameHeader::new(fin, opcode, payload.len() as u64).validate()?;
        Ok(Self {
            fin,
            opcode,
            payload,
        })
    }

    /// A single-frame text message.
    pub fn text(payload: Bytes) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Text,
            payload,
        }
    }

    /// A single-frame binary message.
    pub fn binary(payload: Bytes) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Binary,
            payload,
        }
    }

    /// A ping control frame carrying application data.
    pub fn ping(payload: Bytes) -> Result<Self> {
        Self::new(true, OpCode::Ping, payload)
    }

    /// A pong control frame carrying application data.
    pub fn pong(payload: Bytes) -> Result<Self> {
        Self::new(true, OpCode::Pong, payload)
    }

    /// A close control frame with optional status code and reason.
    pub fn close(code: Option<u16>, reason: &str) -> Result<Self> {
        let payload = match code {
            Some(code) => {
                let mut data = Vec::with_capacity(2 + reason.len());
                data.extend_from_slice(&code.to_be_bytes());
                data.extend_from_slice(reason.as_bytes());
                Bytes::from(data)
            }
            None => Bytes::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// A fragment frame: the initiating `Text`/`Binary` frame of a
    /// fragmented message, or any non-first piece as `Continuation`.
    ///
    /// `fin` marks the last fragment. Zero-length payloads are legal,
    /// including on the final fragment.
    pub fn fragment(opcode: OpCode, payload: Bytes, fin: bool) -> Self {
        debug_assert!(opcode.is_data());
        Self {
            fin,
            opcode,
            payload,
        }
    }

    /// Final fragment flag.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.fin
    }

    /// Frame opcode.
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Whether this is a control frame (ping/pong/close).
    #[inline]
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get a clone of the payload as Bytes (cheap, zero-copy).
    #[inline]
    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Encode this frame's header.
    #[inline]
    pub fn encode_header(&self) -> HeaderBytes {
        FrameHeader::new(self.fin, self.opcode, self.payload.len() as u64).encode()
    }

    /// Total size of this frame on the wire (header + payload).
    #[inline]
    pub fn wire_size(&self) -> usize {
        FrameHeader::wire_len(self.payload.len() as u64) + self.payload.len()
    }
}

/// Build a complete frame as a single byte vector.
///
/// Encodes the header and appends the payload into a contiguous buffer.
/// The writer lane uses scatter/gather slices instead; this is for callers
/// and tests that want one allocation.
pub fn build_frame(frame: &Frame) -> Vec<u8> {
    let header = frame.encode_header();
    let mut buf = Vec::with_capacity(header.len() + frame.payload_len());
    buf.extend_from_slice(header.as_slice());
    buf.extend_from_slice(frame.payload());
    buf
}
