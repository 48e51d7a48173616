//! Protocol module - wire format, framing, and message types.
//!
//! This module implements the binary message protocol:
//! - 9-byte header encoding/decoding
//! - Message body encoding/parsing
//! - Frame buffer for accumulating partial reads

mod frame_buffer;
mod message;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use message::{error_codes, error_schema, Message};
pub use wire_format::{
    Header, MessageKind, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE, RESERVED_CORRELATION_ID,
};
