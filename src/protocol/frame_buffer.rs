//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling partially received frames:
//! - `WaitingForHeader`: need 2-10 bytes depending on the length escape
//! - `WaitingForPayload`: header parsed, need N more payload bytes
//!
//! The engine itself only writes frames; this parser is the receiving half
//! used to reassemble and verify what went over the wire.
//!
//! # Example
//!
//! ```
//! use ws_remote::protocol::{build_frame, Frame, FrameBuffer};
//! use bytes::Bytes;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in arbitrary chunks from the transport
//! let wire = build_frame(&Frame::text(Bytes::from_static(b"hello")));
//! let frames = buffer.push(&wire).unwrap();
//!
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].payload(), b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::frame::Frame;
use super::wire_format::FrameHeader;
use crate::error::{Result, SendError};

/// Default maximum accepted payload size (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 16 * 1024 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete header.
    WaitingForHeader,
    /// Header parsed and consumed, waiting for payload bytes.
    WaitingForPayload { header: FrameHeader },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Uses a state machine to handle partial reads efficiently.
/// All data is stored in a single `BytesMut` buffer to minimize allocations.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_payload_size: u64,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max payload: 16MB.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Create a new frame buffer with custom max payload size.
    pub fn with_max_payload(max_payload_size: u64) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_payload_size,
        }
    }

    /// Push incoming bytes and extract all complete frames.
    ///
    /// Returns a vector of complete frames (may be empty if more data
    /// is needed). Partial data is retained for the next push.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single complete frame from the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed.
    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    let Some((header, header_len)) = FrameHeader::decode(&self.buffer)? else {
                        return Ok(None);
                    };

                    if header.payload_len > self.max_payload_size {
                        return Err(SendError::Protocol(format!(
                            "Payload size {} exceeds maximum {}",
                            header.payload_len, self.max_payload_size
                        )));
                    }

                    let _ = self.buffer.split_to(header_len);
                    self.state = State::WaitingForPayload { header };
                }
                State::WaitingForPayload { header } => {
                    let needed = header.payload_len as usize;
                    if self.buffer.len() < needed {
                        return Ok(None);
                    }

                    let payload: Bytes = self.buffer.split_to(needed).freeze();
                    let frame = Frame::new(header.fin, header.opcode, payload)?;

                    self.state = State::WaitingForHeader;
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    /// Number of buffered bytes not yet consumed by a complete frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Current state name for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
