//! # ampwire
//!
//! Symmetric, typed command/response protocol over TCP and TLS.
//!
//! Either end of a connection can call named commands on the other. Every
//! command has a declared argument and response schema; values are checked
//! against it on both send and receive. Replies are matched to calls by
//! correlation ID, so calls may be answered in any order.
//!
//! ## Architecture
//!
//! - **Codec**: typed values (integers, bytes, text, decimals, timestamps,
//!   lists, records) and their binary encoding
//! - **Protocol**: 9-byte frame header plus a message body of named fields
//! - **Connection**: read loop, concurrent handlers, a single writer task
//! - **Session**: the counting exchange built on top
//!
//! ## Example
//!
//! ```ignore
//! use ampwire::codec::{Fields, Schema, ValueType};
//! use ampwire::handler::{CommandSchema, Reply};
//! use ampwire::ConnectionBuilder;
//!
//! let sum = CommandSchema::new(
//!     "Sum",
//!     Schema::new().field("a", ValueType::Integer).field("b", ValueType::Integer),
//!     Schema::new().field("total", ValueType::Integer),
//! );
//!
//! let connection = ConnectionBuilder::new()
//!     .command(sum, |args: Fields, _ctx| async move {
//!         let a = args.get("a").and_then(|v| v.as_integer()).unwrap_or(0);
//!         let b = args.get("b").and_then(|v| v.as_integer()).unwrap_or(0);
//!         Ok(Reply::new(Fields::new().with("total", a + b)))
//!     })
//!     .start(stream)?;
//!
//! let total = connection.peer().call("Sum", Fields::new().with("a", 1).with("b", 2)).await?;
//! ```

pub mod clock;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod writer;

mod pending;

pub use config::Config;
pub use connection::{Connection, ConnectionBuilder};
pub use error::{AmpError, Result};
pub use handler::{CallContext, CommandSchema, Reply};
pub use peer::{Peer, PendingReply};
pub use session::{run_count_session, CountSession, SessionSnapshot, SessionState};
