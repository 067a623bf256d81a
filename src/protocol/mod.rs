//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the RFC 6455 frame layer for the send side:
//! - Variable-length header encoding/decoding (unmasked)
//! - Frame struct with typed accessors
//! - Payload to frame transformation with fragmentation policies
//! - Frame buffer for reassembling the wire stream from partial reads

mod encoder;
mod frame;
mod frame_buffer;
mod wire_format;

pub use encoder::{encode_fragment, encode_message, FragmentPolicy};
pub use frame::{build_frame, Frame};
pub use frame_buffer::{FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
pub use wire_format::{
    FrameHeader, HeaderBytes, OpCode, MAX_CONTROL_PAYLOAD, MAX_HEADER_SIZE, MIN_HEADER_SIZE,
};
