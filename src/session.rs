//! The counting session.
//!
//! Both peers answer `Count(n)` with a fixed, fully typed payload, then keep
//! the exchange going by calling `Count(n + 1)` on the other side while
//! `n + 1 < max_count`. The side that reaches the limit closes the connection
//! once its last response is queued.
//!
//! ```text
//!   Idle ──(send Count)──► AwaitingPeerReply ──(reply)──► Idle
//!     │                          │
//!     └──── limit / teardown ────┴──────────────► Terminated
//! ```
//!
//! One session is created per connection; nothing is shared between
//! connections.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::codec::{Decimal, Fields, Schema, Value, ValueType};
use crate::config::{Config, SessionConfig};
use crate::connection::ConnectionBuilder;
use crate::error::{AmpError, Result};
use crate::handler::{CallContext, CommandSchema, HandlerResult, Reply};
use crate::peer::Peer;
use crate::transport::Transport;

/// Name of the counting command.
pub const COUNT_COMMAND: &str = "Count";

/// Schema of `Count`: one integer argument, ten typed response fields.
pub fn count_schema() -> CommandSchema {
    let item = Schema::new()
        .field("a", ValueType::Integer)
        .field("b", ValueType::Text);

    CommandSchema::new(
        COUNT_COMMAND,
        Schema::new().field("n", ValueType::Integer),
        Schema::new()
            .field("oki", ValueType::Integer)
            .field("oks", ValueType::Bytes)
            .field("oku", ValueType::Text)
            .field("okb", ValueType::Boolean)
            .field("okf", ValueType::Float)
            .field("okd", ValueType::Decimal)
            .field("okt", ValueType::Timestamp)
            .field("okl1", ValueType::list(ValueType::Integer))
            .field("okl2", ValueType::list(ValueType::list(ValueType::Bytes)))
            .field("okla", ValueType::list(ValueType::Record(item))),
    )
}

/// Fixed values sent in every `Count` response.
///
/// The decimal field is always exactly 3/4 and the timestamp comes from the
/// session's clock, so neither is configurable here.
#[derive(Debug, Clone, PartialEq)]
pub struct CountPayload {
    /// `oki`
    pub integer: i64,
    /// `oks`
    pub bytes: Bytes,
    /// `oku`
    pub text: String,
    /// `okb`
    pub boolean: bool,
    /// `okf`
    pub float: f64,
    /// `okl1`
    pub integers: Vec<i64>,
    /// `okl2`
    pub nested: Vec<Vec<Bytes>>,
    /// `okla`, as `(a, b)` pairs
    pub items: Vec<(i64, String)>,
}

impl Default for CountPayload {
    fn default() -> Self {
        let bytes = |list: &[&'static str]| {
            list.iter()
                .map(|s| Bytes::from_static(s.as_bytes()))
                .collect::<Vec<_>>()
        };
        Self {
            integer: 1,
            bytes: Bytes::from_static(b"2"),
            text: "3".to_string(),
            boolean: true,
            float: 5.123,
            integers: vec![4, 5, 6],
            nested: vec![
                bytes(&["str01", "str02"]),
                bytes(&["str03", "str04", "str05"]),
            ],
            items: vec![(7, "hello".to_string()), (9, "goodbye".to_string())],
        }
    }
}

impl CountPayload {
    /// Response fields stamped with `now`.
    pub fn to_fields(&self, now: DateTime<Utc>) -> Result<Fields> {
        let three_quarters = Decimal::exact_quotient(3, 4).ok_or_else(|| {
            AmpError::HandlerContractViolation("3/4 has no exact decimal form".to_string())
        })?;

        let integers = self.integers.iter().map(|&i| Value::Integer(i)).collect();
        let nested = self
            .nested
            .iter()
            .map(|inner| Value::List(inner.iter().cloned().map(Value::Bytes).collect()))
            .collect();
        let items = self
            .items
            .iter()
            .map(|(a, b)| Value::Record(Fields::new().with("a", *a).with("b", b.as_str())))
            .collect();

        Ok(Fields::new()
            .with("oki", self.integer)
            .with("oks", Value::Bytes(self.bytes.clone()))
            .with("oku", self.text.as_str())
            .with("okb", self.boolean)
            .with("okf", self.float)
            .with("okd", three_quarters)
            .with("okt", now)
            .with("okl1", Value::List(integers))
            .with("okl2", Value::List(nested))
            .with("okla", Value::List(items)))
    }
}

/// Where the session is in the counting cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No self-initiated call outstanding.
    Idle,
    /// A `Count` call was sent and its reply has not arrived.
    AwaitingPeerReply,
    /// Limit reached or connection gone.
    Terminated,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current state.
    pub state: SessionState,
    /// `Count` calls issued by this side.
    pub calls_sent: u64,
    /// `Count` calls answered by this side.
    pub calls_received: u64,
    /// Successful replies to this side's calls.
    pub replies_received: u64,
    /// Counter of the most recent call received.
    pub last_received: Option<i64>,
}

struct Status {
    state: SessionState,
    calls_sent: u64,
    calls_received: u64,
    replies_received: u64,
    last_received: Option<i64>,
}

struct Inner {
    max_count: u32,
    initiate: bool,
    clock: Arc<dyn Clock>,
    payload: CountPayload,
    status: Mutex<Status>,
}

/// Per-connection counting state machine.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CountSession {
    inner: Arc<Inner>,
}

impl CountSession {
    /// Create a session using the system clock and the default payload.
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a session with an explicit clock.
    pub fn with_clock(config: &SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_count: config.max_count,
                initiate: config.initiate,
                clock,
                payload: CountPayload::default(),
                status: Mutex::new(Status {
                    state: SessionState::Idle,
                    calls_sent: 0,
                    calls_received: 0,
                    replies_received: 0,
                    last_received: None,
                }),
            }),
        }
    }

    /// Replace the fixed response values.
    ///
    /// Must be called before the session is installed.
    pub fn with_payload(self, payload: CountPayload) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.payload = payload;
                inner
            }
            Err(shared) => {
                tracing::warn!("session already shared, keeping its payload");
                return Self { inner: shared };
            }
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Register the `Count` handler on a connection builder.
    pub fn install(&self, builder: ConnectionBuilder) -> ConnectionBuilder {
        let inner = self.inner.clone();
        builder.command(count_schema(), move |args: Fields, ctx: CallContext| {
            std::future::ready(inner.handle_count(&args, &ctx))
        })
    }

    /// Begin the session on a started connection.
    ///
    /// Sends `Count(1)` if this side initiates and 1 is below the limit,
    /// otherwise closes. Marks the session terminated once the connection
    /// closes.
    pub async fn start(&self, peer: &Peer) -> Result<()> {
        let watcher = self.inner.clone();
        let closed = peer.clone();
        tokio::spawn(async move {
            closed.closed().await;
            watcher.status().state = SessionState::Terminated;
        });

        if !self.inner.initiate {
            return Ok(());
        }

        if self.inner.max_count <= 1 {
            tracing::info!(max_count = self.inner.max_count, "limit reached, closing");
            self.inner.status().state = SessionState::Terminated;
            peer.close();
            return Ok(());
        }

        tracing::info!(n = 1, "sending Count");
        self.inner.mark_sent();
        let pending = match peer.start_call(COUNT_COMMAND, count_args(1)).await {
            Ok(pending) => pending,
            Err(e) => {
                self.inner.status().state = SessionState::Terminated;
                return Err(e);
            }
        };

        let inner = self.inner.clone();
        let peer = peer.clone();
        tokio::spawn(async move {
            let result = pending.wait().await;
            inner.on_reply(result, Some(&peer));
        });
        Ok(())
    }

    /// Current counters and state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.inner.status();
        SessionSnapshot {
            state: status.state,
            calls_sent: status.calls_sent,
            calls_received: status.calls_received,
            replies_received: status.replies_received,
            last_received: status.last_received,
        }
    }
}

fn count_args(n: i64) -> Fields {
    Fields::new().with("n", n)
}

impl Inner {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_sent(&self) {
        let mut status = self.status();
        status.calls_sent += 1;
        if status.state != SessionState::Terminated {
            status.state = SessionState::AwaitingPeerReply;
        }
    }

    fn handle_count(self: &Arc<Self>, args: &Fields, ctx: &CallContext) -> HandlerResult {
        let n = args
            .get("n")
            .and_then(Value::as_integer)
            .ok_or_else(|| AmpError::SchemaViolation("n must be an integer".to_string()))?;
        if n < 0 {
            return Err(AmpError::SchemaViolation(format!(
                "n must be non-negative, got {}",
                n
            )));
        }

        tracing::info!(n, "received Count");
        {
            let mut status = self.status();
            status.calls_received += 1;
            status.last_received = Some(n);
        }

        let reply = Reply::new(self.payload.to_fields(self.clock.now())?);

        match n.checked_add(1) {
            Some(next) if next < i64::from(self.max_count) => {
                tracing::info!(n = next, "sending Count");
                self.mark_sent();
                let inner = self.clone();
                let peer = ctx.peer().cloned();
                Ok(reply.then_call_with(COUNT_COMMAND, count_args(next), move |result| {
                    inner.on_reply(result, peer.as_ref())
                }))
            }
            _ => {
                tracing::info!(n, max_count = self.max_count, "limit reached, closing");
                self.status().state = SessionState::Terminated;
                Ok(reply.then_close())
            }
        }
    }

    fn on_reply(&self, result: Result<Fields>, peer: Option<&Peer>) {
        match result {
            Ok(fields) => {
                tracing::info!(response = ?fields, "Count response");
                let mut status = self.status();
                status.replies_received += 1;
                if status.state == SessionState::AwaitingPeerReply {
                    status.state = SessionState::Idle;
                }
            }
            Err(AmpError::ConnectionLost) => {
                tracing::debug!("connection closed before Count reply");
                self.status().state = SessionState::Terminated;
            }
            Err(e) => {
                // The peer will not continue the chain; nothing left to do here
                tracing::warn!(error = %e, "Count call failed");
                self.status().state = SessionState::Terminated;
                if let Some(peer) = peer {
                    if e.is_fatal() {
                        peer.abort(e);
                    } else {
                        peer.close();
                    }
                }
            }
        }
    }
}

/// Run one counting session over an established stream until it ends.
///
/// Returns the final snapshot, or the error that tore the connection down.
pub async fn run_count_session<S: Transport>(stream: S, config: &Config) -> Result<SessionSnapshot> {
    let session = CountSession::new(&config.session);
    let connection = session
        .install(ConnectionBuilder::new())
        .config(config.connection.clone())
        .start(stream)?;

    session.start(connection.peer()).await?;
    connection.wait_for_shutdown().await?;

    // The close watcher may not have run yet
    session.inner.status().state = SessionState::Terminated;
    Ok(session.snapshot())
}
