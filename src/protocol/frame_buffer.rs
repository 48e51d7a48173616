//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented messages:
//! - `WaitingForHeader`: Need at least 9 bytes
//! - `WaitingForBody`: Header validated, need N more body bytes
//!
//! # Example
//!
//! ```
//! use ampwire::protocol::{FrameBuffer, Message};
//!
//! let bytes = Message::response(1, vec![]).serialize().unwrap();
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! assert!(buffer.push(&bytes[..5]).unwrap().is_empty());
//! let messages = buffer.push(&bytes[5..]).unwrap();
//! assert_eq!(messages.len(), 1);
//! ```

use bytes::BytesMut;

use super::message::Message;
use super::wire_format::{Header, MessageKind, DEFAULT_MAX_BODY_SIZE, HEADER_SIZE};

use crate::error::Result;

/// State machine for message parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 9 bytes).
    WaitingForHeader,
    /// Header validated, waiting for body bytes.
    WaitingForBody {
        kind: MessageKind,
        correlation_id: u32,
        remaining: u32,
    },
}

/// Buffer for accumulating incoming bytes and extracting complete messages.
///
/// Uses a state machine to handle partial reads efficiently.
/// All data is stored in a single `BytesMut` buffer to minimize allocations.
/// Once an error is returned the stream is corrupt and the buffer must not be
/// fed again.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed body size.
    max_body_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max body: 16 MiB.
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY_SIZE)
    }

    /// Create a new frame buffer with custom max body size.
    pub fn with_max_body(max_body_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_body_size,
        }
    }

    /// Push data into the buffer and extract all complete messages.
    ///
    /// This is the main API for processing incoming data from the socket.
    /// If data is fragmented, partial data is buffered internally for the
    /// next push.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` for an invalid header or body.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        self.extend(data);

        let mut messages = Vec::new();
        while let Some(message) = self.try_extract_message()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Try to extract a single message from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(message))` if a complete message was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on protocol violation (e.g., body too large)
    pub fn try_extract_message(&mut self) -> Result<Option<Message>> {
        if let State::WaitingForHeader = self.state {
            let Some(header) = Header::decode(&self.buffer) else {
                return Ok(None);
            };
            let kind = header.validate(self.max_body_size)?;

            // Consume header bytes
            let _ = self.buffer.split_to(HEADER_SIZE);

            self.state = State::WaitingForBody {
                kind,
                correlation_id: header.correlation_id,
                remaining: header.body_length,
            };
        }

        let State::WaitingForBody {
            kind,
            correlation_id,
            remaining,
        } = self.state
        else {
            return Ok(None);
        };

        let remaining = remaining as usize;
        if self.buffer.len() < remaining {
            return Ok(None);
        }

        let body = self.buffer.split_to(remaining).freeze();
        self.state = State::WaitingForHeader;

        Message::parse(kind, correlation_id, &body).map(Some)
    }

    /// Append data to the buffer without extracting messages.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
