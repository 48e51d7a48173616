//! Handle to the remote side of a connection.
//!
//! A [`Peer`] is how local code talks to the other end: issue calls, send
//! messages, close or abort the connection. It also routes incoming messages:
//! calls go to the [`CommandRegistry`], replies resolve pending calls by
//! correlation ID regardless of arrival order.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{oneshot, watch};

use crate::codec::Fields;
use crate::error::{AmpError, Result};
use crate::handler::{CallContext, CommandRegistry, Dispatched, FollowUp};
use crate::pending::{PendingCall, PendingCalls};
use crate::protocol::{Message, MessageKind};
use crate::writer::{OutboundFrame, WriterHandle};

struct Shared {
    registry: Arc<CommandRegistry>,
    pending: PendingCalls,
    writer: WriterHandle,
    shutdown: watch::Sender<bool>,
    /// First fatal error seen on this connection.
    failure: Mutex<Option<AmpError>>,
}

/// Cloneable handle to one connection's remote side.
#[derive(Clone)]
pub struct Peer {
    shared: Arc<Shared>,
}

/// A call that has been sent and is waiting for its reply.
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: u32,
    rx: oneshot::Receiver<Result<Fields>>,
}

impl PendingReply {
    /// Correlation ID the call was sent with.
    pub fn correlation_id(&self) -> u32 {
        self.correlation_id
    }

    /// Wait for the reply.
    ///
    /// Resolves with the decoded response fields, `Remote` for an Error
    /// reply, or `ConnectionLost` if the connection ends first.
    pub async fn wait(self) -> Result<Fields> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(AmpError::ConnectionLost),
        }
    }
}

impl Peer {
    pub(crate) fn new(
        registry: Arc<CommandRegistry>,
        writer: WriterHandle,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                pending: PendingCalls::new(),
                writer,
                shutdown,
                failure: Mutex::new(None),
            }),
        }
    }

    /// Command registry shared by this connection.
    pub fn registry(&self) -> &CommandRegistry {
        &self.shared.registry
    }

    /// Send a call and return without waiting for the reply.
    ///
    /// The command must be known to the local registry (registered or
    /// declared) so its arguments can be checked and its response decoded.
    pub async fn start_call(&self, command: &str, arguments: Fields) -> Result<PendingReply> {
        let schema = self
            .shared
            .registry
            .schema(command)
            .cloned()
            .ok_or_else(|| AmpError::UnknownCommand(command.to_string()))?;
        let fields = schema.arguments.encode_fields(&arguments)?;

        // Register before sending so a fast reply always finds its entry
        let (id, rx) = self.shared.pending.register(schema)?;
        if let Err(e) = self.send(&Message::call(id, command, fields)).await {
            self.shared.pending.take(id);
            return Err(e);
        }

        Ok(PendingReply {
            correlation_id: id,
            rx,
        })
    }

    /// Call a command on the peer and wait for its response fields.
    pub async fn call(&self, command: &str, arguments: Fields) -> Result<Fields> {
        self.start_call(command, arguments).await?.wait().await
    }

    /// Queue a message for writing.
    pub async fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(AmpError::ConnectionLost);
        }
        let frame = OutboundFrame::from_message(message)?;
        self.shared.writer.send(frame).await
    }

    /// Close the connection after already queued messages are written.
    pub fn close(&self) {
        self.shared.shutdown.send_replace(true);
    }

    /// Close the connection because of a fatal error.
    ///
    /// Only the first error is kept; it becomes the connection's outcome.
    pub fn abort(&self, error: AmpError) {
        {
            let mut failure = self
                .shared
                .failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if failure.is_none() {
                if error.is_peer_caused() {
                    tracing::warn!(error = %error, "closing connection");
                } else {
                    tracing::error!(error = %error, "closing connection");
                }
                *failure = Some(error);
            }
        }
        self.close();
    }

    /// Whether close or abort has been requested.
    pub fn is_closed(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    /// Wait until close or abort is requested.
    pub async fn closed(&self) {
        let mut rx = self.shared.shutdown.subscribe();
        loop {
            let closed = *rx.borrow_and_update();
            if closed || rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    /// Route one incoming message.
    ///
    /// Calls are dispatched and their reply returned for sending. Replies
    /// resolve the matching pending call and yield nothing. An error return
    /// is fatal for the connection.
    pub(crate) async fn handle_incoming(&self, message: Message) -> Result<Option<Dispatched>> {
        match message.kind {
            MessageKind::Call => {
                let ctx = CallContext::with_peer(
                    message.correlation_id,
                    &message.command,
                    self.clone(),
                );
                self.shared.registry.dispatch(message, ctx).await.map(Some)
            }
            MessageKind::Response | MessageKind::Error => {
                self.resolve(message)?;
                Ok(None)
            }
        }
    }

    /// Run a reply's follow-up. Must only be called once the reply is queued.
    pub(crate) fn run_follow_up(&self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::Close => self.close(),
            FollowUp::Call {
                command,
                arguments,
                on_reply,
            } => {
                let peer = self.clone();
                tokio::spawn(async move {
                    let result = peer.call(&command, arguments).await;
                    if let Some(hook) = on_reply {
                        return hook(result);
                    }
                    match result {
                        Ok(fields) => {
                            tracing::debug!(%command, fields = fields.len(), "follow-up call answered")
                        }
                        Err(AmpError::ConnectionLost) => {
                            tracing::debug!(%command, "connection closed before follow-up reply")
                        }
                        Err(e) if e.is_fatal() => peer.abort(e),
                        Err(e) => tracing::warn!(%command, error = %e, "follow-up call failed"),
                    }
                });
            }
        }
    }

    /// Fail everything still pending. Called once the connection is gone.
    pub(crate) fn fail_pending(&self) -> usize {
        self.shared.pending.fail_all()
    }

    /// Take the recorded fatal error, if any.
    pub(crate) fn take_failure(&self) -> Option<AmpError> {
        self.shared
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn resolve(&self, message: Message) -> Result<()> {
        let Some(PendingCall { schema, tx }) = self.shared.pending.take(message.correlation_id)
        else {
            // Unmatched reply: a peer bug, not worth the connection
            let err = AmpError::ProtocolViolation(format!(
                "no pending call with correlation id {}",
                message.correlation_id
            ));
            tracing::warn!(error = %err, "dropping reply");
            return Ok(());
        };

        let (outcome, fatal) = match message.kind {
            MessageKind::Error => match message.error_parts() {
                Ok((code, description)) => (Err(AmpError::Remote { code, description }), None),
                Err(AmpError::MalformedValue(detail)) => (
                    Err(AmpError::MalformedValue(detail.clone())),
                    Some(AmpError::MalformedValue(detail)),
                ),
                Err(e) => (Err(e), None),
            },
            _ => match schema.response.decode_fields(&message.fields) {
                Ok(fields) => (Ok(fields), None),
                Err(AmpError::MalformedValue(detail)) => (
                    Err(AmpError::MalformedValue(detail.clone())),
                    Some(AmpError::MalformedValue(detail)),
                ),
                Err(e) => (Err(e), None),
            },
        };

        // The caller may have stopped waiting
        let _ = tx.send(outcome);
        fatal.map_or(Ok(()), Err)
    }
}
