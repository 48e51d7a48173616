//! Wire format encoding and decoding.
//!
//! Implements the 9-byte message header:
//! ```text
//! ┌──────────┬────────┬──────────┐
//! │ Body len │ Kind   │ Corr ID  │
//! │ 4 bytes  │ 1 byte │ 4 bytes  │
//! │ uint32 BE│        │ uint32 BE│
//! └──────────┴────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{AmpError, Result};

/// Header size in bytes (fixed, exactly 9).
pub const HEADER_SIZE: usize = 9;

/// Default maximum body size (16 MiB).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 16 * 1024 * 1024;

/// Reserved correlation ID (never allocated).
pub const RESERVED_CORRELATION_ID: u32 = 0;

/// Message kind carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Request to execute a named command.
    Call = 1,
    /// Successful reply to a call.
    Response = 2,
    /// Error reply to a call.
    Error = 3,
}

impl MessageKind {
    /// Parse a kind byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageKind::Call),
            2 => Some(MessageKind::Response),
            3 => Some(MessageKind::Error),
            _ => None,
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Body length in bytes.
    pub body_length: u32,
    /// Raw kind byte (see [`MessageKind`]).
    pub kind: u8,
    /// Correlation identifier (0 reserved).
    pub correlation_id: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(kind: MessageKind, correlation_id: u32, body_length: u32) -> Self {
        Self {
            body_length,
            kind: kind as u8,
            correlation_id,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use ampwire::protocol::{Header, MessageKind};
    ///
    /// let header = Header::new(MessageKind::Call, 42, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 9);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (9 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.body_length.to_be_bytes());
        buf[4] = self.kind;
        buf[5..9].copy_from_slice(&self.correlation_id.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    ///
    /// # Example
    ///
    /// ```
    /// use ampwire::protocol::Header;
    ///
    /// let bytes = [0, 0, 0, 100, 1, 0, 0, 0, 42];
    /// let header = Header::decode(&bytes).unwrap();
    /// assert_eq!(header.body_length, 100);
    /// assert_eq!(header.correlation_id, 42);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            body_length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            kind: buf[4],
            correlation_id: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Body length doesn't exceed max
    /// - Kind byte is known
    /// - Correlation ID is not 0 (reserved)
    pub fn validate(&self, max_body_size: u32) -> Result<MessageKind> {
        if self.body_length > max_body_size {
            return Err(AmpError::ProtocolViolation(format!(
                "Body size {} exceeds maximum {}",
                self.body_length, max_body_size
            )));
        }

        let kind = MessageKind::from_u8(self.kind).ok_or_else(|| {
            AmpError::ProtocolViolation(format!("Unknown message kind {}", self.kind))
        })?;

        if self.correlation_id == RESERVED_CORRELATION_ID {
            return Err(AmpError::ProtocolViolation(
                "Correlation ID 0 is reserved".to_string(),
            ));
        }

        Ok(kind)
    }
}
