//! Error types for ampwire.

use thiserror::Error;

/// Main error type for all ampwire operations.
#[derive(Debug, Error)]
pub enum AmpError {
    /// I/O failure on the underlying stream (connect refused, reset, ...).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// A value's bytes do not decode as its declared type.
    #[error("malformed value: {0}")]
    MalformedValue(String),

    /// Argument or response fields do not match the declared schema.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// Framing or correlation inconsistency.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A local handler broke its contract (e.g. returned non-conforming fields).
    #[error("handler contract violation: {0}")]
    HandlerContractViolation(String),

    /// No schema is registered for the named command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The peer answered a call with an Error message.
    #[error("remote error {code}: {description}")]
    Remote {
        /// Error code sent by the peer.
        code: String,
        /// Human readable description sent by the peer.
        description: String,
    },

    /// The connection closed before the operation completed.
    #[error("connection lost")]
    ConnectionLost,

    /// Outbound queue stayed full for longer than the configured timeout.
    #[error("backpressure timeout")]
    BackpressureTimeout,
}

impl AmpError {
    /// Whether this error leaves the stream in a state that must not be reused.
    ///
    /// Schema violations, unknown commands and remote errors are answered or
    /// reported per call; everything else tears the connection down.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AmpError::SchemaViolation(_) | AmpError::UnknownCommand(_) | AmpError::Remote { .. }
        )
    }

    /// Whether the failure was caused by the other side or the link to it,
    /// rather than by local code or configuration.
    pub fn is_peer_caused(&self) -> bool {
        matches!(
            self,
            AmpError::Transport(_)
                | AmpError::Tls(_)
                | AmpError::MalformedValue(_)
                | AmpError::ProtocolViolation(_)
                | AmpError::Remote { .. }
                | AmpError::ConnectionLost
        )
    }
}

/// Result type alias using AmpError.
pub type Result<T> = std::result::Result<T, AmpError>;
