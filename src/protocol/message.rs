//! Message struct with typed accessors.
//!
//! Represents one complete protocol message: header fields plus the decoded
//! body (command name and encoded fields). Field values stay encoded until the
//! dispatcher checks them against a schema.
//!
//! Body layout:
//! ```text
//! name len u16 | name | field count u16 | { name len u16 | name | tag u8 | len u32 | value }*
//! ```
//!
//! # Example
//!
//! ```
//! use ampwire::protocol::{Message, MessageKind};
//!
//! let msg = Message::error(7, "UNKNOWN_COMMAND", "no such command: Nope");
//! let bytes = msg.serialize().unwrap();
//! assert_eq!(bytes[4], MessageKind::Error as u8);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::wire_format::{Header, MessageKind, HEADER_SIZE};
use crate::codec::{put_name, tags, EncodedField, Schema, ValueType};
use crate::error::{AmpError, Result};

/// Error codes sent in Error messages.
pub mod error_codes {
    /// Call arguments did not match the command's schema.
    pub const SCHEMA_VIOLATION: &str = "SCHEMA_VIOLATION";
    /// No schema is known for the command.
    pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
    /// The command is known but could not be answered.
    pub const UNHANDLED: &str = "UNHANDLED";
}

/// Field set of an Error message: `code` and `description`, both text.
pub fn error_schema() -> Schema {
    Schema::new()
        .field("code", ValueType::Text)
        .field("description", ValueType::Text)
}

/// A complete protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Call, Response or Error.
    pub kind: MessageKind,
    /// Correlation identifier linking a reply to its call.
    pub correlation_id: u32,
    /// Command name (empty for Response and Error).
    pub command: String,
    /// Encoded argument or response fields.
    pub fields: Vec<EncodedField>,
}

impl Message {
    /// Create a Call message.
    pub fn call(correlation_id: u32, command: &str, fields: Vec<EncodedField>) -> Self {
        Self {
            kind: MessageKind::Call,
            correlation_id,
            command: command.to_string(),
            fields,
        }
    }

    /// Create a Response message.
    pub fn response(correlation_id: u32, fields: Vec<EncodedField>) -> Self {
        Self {
            kind: MessageKind::Response,
            correlation_id,
            command: String::new(),
            fields,
        }
    }

    /// Create an Error message with a code and description.
    pub fn error(correlation_id: u32, code: &str, description: &str) -> Self {
        let text = |name: &str, value: &str| EncodedField {
            name: name.to_string(),
            tag: tags::TEXT,
            value: Bytes::copy_from_slice(value.as_bytes()),
        };
        Self {
            kind: MessageKind::Error,
            correlation_id,
            command: String::new(),
            fields: vec![text("code", code), text("description", description)],
        }
    }

    /// Check if this is a call.
    #[inline]
    pub fn is_call(&self) -> bool {
        self.kind == MessageKind::Call
    }

    /// Extract `(code, description)` from an Error message.
    ///
    /// Fails with `SchemaViolation` if the fields are not the error field set.
    pub fn error_parts(&self) -> Result<(String, String)> {
        let fields = error_schema().decode_fields(&self.fields)?;
        let text = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.as_text())
                .map(str::to_string)
                .unwrap_or_default()
        };
        Ok((text("code"), text("description")))
    }

    /// Encode the message body.
    pub fn encode_body(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.body_size_hint());
        put_name(&mut buf, &self.command)?;

        let count = u16::try_from(self.fields.len()).map_err(|_| {
            AmpError::SchemaViolation(format!("too many fields: {}", self.fields.len()))
        })?;
        buf.put_u16(count);

        for field in &self.fields {
            put_name(&mut buf, &field.name)?;
            buf.put_u8(field.tag);
            let len = u32::try_from(field.value.len()).map_err(|_| {
                AmpError::SchemaViolation(format!("field {} is too large", field.name))
            })?;
            buf.put_u32(len);
            buf.put_slice(&field.value);
        }
        Ok(buf.freeze())
    }

    /// Encode header and body separately, for vectored writes.
    pub fn to_frame_parts(&self) -> Result<([u8; HEADER_SIZE], Bytes)> {
        let body = self.encode_body()?;
        let len = u32::try_from(body.len())
            .map_err(|_| AmpError::SchemaViolation("message body too large".to_string()))?;
        let header = Header::new(self.kind, self.correlation_id, len);
        Ok((header.encode(), body))
    }

    /// Serialize to a single contiguous buffer (header + body).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let (header, body) = self.to_frame_parts()?;
        let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Parse a message body for an already validated header.
    ///
    /// Any structural inconsistency in the body is a `ProtocolViolation`.
    pub fn parse(kind: MessageKind, correlation_id: u32, body: &[u8]) -> Result<Self> {
        let mut buf = body;
        let command = read_name(&mut buf)?;
        match kind {
            MessageKind::Call if command.is_empty() => {
                return Err(violation("call without a command name"))
            }
            MessageKind::Response | MessageKind::Error if !command.is_empty() => {
                return Err(violation("reply must not carry a command name"))
            }
            _ => {}
        }

        need(buf, 2)?;
        let count = buf.get_u16() as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let name = read_name(&mut buf)?;
            need(buf, 5)?;
            let tag = buf.get_u8();
            if !tags::is_known(tag) {
                return Err(violation(&format!("unknown type tag {} on field {}", tag, name)));
            }
            let len = buf.get_u32() as usize;
            need(buf, len)?;
            let (value, rest) = buf.split_at(len);
            buf = rest;
            fields.push(EncodedField {
                name,
                tag,
                value: Bytes::copy_from_slice(value),
            });
        }

        if !buf.is_empty() {
            return Err(violation(&format!(
                "{} trailing bytes after last field",
                buf.len()
            )));
        }

        Ok(Self {
            kind,
            correlation_id,
            command,
            fields,
        })
    }

    fn body_size_hint(&self) -> usize {
        4 + self.command.len()
            + self
                .fields
                .iter()
                .map(|f| 7 + f.name.len() + f.value.len())
                .sum::<usize>()
    }
}

fn violation(msg: &str) -> AmpError {
    AmpError::ProtocolViolation(msg.to_string())
}

fn need(buf: &[u8], len: usize) -> Result<()> {
    if buf.len() < len {
        return Err(violation("truncated message body"));
    }
    Ok(())
}

fn read_name(buf: &mut &[u8]) -> Result<String> {
    need(buf, 2)?;
    let len = buf.get_u16() as usize;
    need(buf, len)?;
    let (name, rest) = buf.split_at(len);
    *buf = rest;
    String::from_utf8(name.to_vec()).map_err(|_| violation("name is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Fields;

    fn count_args(n: i64) -> Vec<EncodedField> {
        Schema::new()
            .field("n", ValueType::Integer)
            .encode_fields(&Fields::new().with("n", n))
            .unwrap()
    }

    fn reparse(msg: &Message) -> Message {
        let bytes = msg.serialize().unwrap();
        let header = Header::decode(&bytes).unwrap();
        let kind = header.validate(u32::MAX).unwrap();
        assert_eq!(header.body_length as usize, bytes.len() - HEADER_SIZE);
        Message::parse(kind, header.correlation_id, &bytes[HEADER_SIZE..]).unwrap()
    }

    #[test]
    fn test_call_roundtrip() {
        let msg = Message::call(3, "Count", count_args(1));
        assert_eq!(reparse(&msg), msg);
        assert!(msg.is_call());
    }

    #[test]
    fn test_response_with_no_fields() {
        let msg = Message::response(9, vec![]);
        let bytes = msg.serialize().unwrap();
        // header + empty name + zero count
        assert_eq!(bytes.len(), HEADER_SIZE + 4);
        assert_eq!(reparse(&msg), msg);
    }

    #[test]
    fn test_error_parts() {
        let msg = Message::error(4, error_codes::UNHANDLED, "boom");
        let parsed = reparse(&msg);
        let (code, description) = parsed.error_parts().unwrap();
        assert_eq!(code, "UNHANDLED");
        assert_eq!(description, "boom");
    }

    #[test]
    fn test_error_parts_wrong_fields() {
        let msg = Message {
            kind: MessageKind::Error,
            correlation_id: 1,
            command: String::new(),
            fields: count_args(1),
        };
        assert!(matches!(msg.error_parts(), Err(AmpError::SchemaViolation(_))));
    }

    #[test]
    fn test_parse_truncated_body() {
        let bytes = Message::call(3, "Count", count_args(1)).serialize().unwrap();
        let body = &bytes[HEADER_SIZE..bytes.len() - 1];
        let err = Message::parse(MessageKind::Call, 3, body).unwrap_err();
        assert!(matches!(err, AmpError::ProtocolViolation(_)));
    }

    #[test]
    fn test_parse_trailing_bytes() {
        let mut bytes = Message::response(3, vec![]).serialize().unwrap();
        bytes.push(0);
        let err = Message::parse(MessageKind::Response, 3, &bytes[HEADER_SIZE..]).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_parse_unknown_tag() {
        let mut msg = Message::call(3, "Count", count_args(1));
        msg.fields[0].tag = 42;
        let bytes = msg.serialize().unwrap();
        let err = Message::parse(MessageKind::Call, 3, &bytes[HEADER_SIZE..]).unwrap_err();
        assert!(err.to_string().contains("unknown type tag 42"));
    }

    #[test]
    fn test_parse_name_rules() {
        let call = Message::call(1, "", vec![]).serialize().unwrap();
        assert!(Message::parse(MessageKind::Call, 1, &call[HEADER_SIZE..]).is_err());

        let named = Message::call(1, "Count", vec![]).serialize().unwrap();
        assert!(Message::parse(MessageKind::Response, 1, &named[HEADER_SIZE..]).is_err());
    }
}
