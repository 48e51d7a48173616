//! Transport module - byte streams a connection can run over.
//!
//! Provides:
//! - [`tcp`] - plain TCP listener and connector
//! - [`tls`] - TLS on top of TCP via rustls
//!
//! Any `AsyncRead + AsyncWrite` stream works, including in-memory
//! `tokio::io::duplex` pairs.

pub mod tcp;
pub mod tls;

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream usable by a connection.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub use tcp::{connect, Listener};
pub use tls::{TlsAcceptor, TlsConnector, TrustPolicy};
