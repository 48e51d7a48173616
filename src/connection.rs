//! Connection builder and runtime loop.
//!
//! The [`ConnectionBuilder`] collects command schemas and handlers, then
//! [`ConnectionBuilder::start`] binds them to an established byte stream:
//! 1. Split the stream into read and write halves
//! 2. Spawn the writer task on the write half
//! 3. Spawn the read loop: reassemble messages and dispatch them
//!
//! The same runtime serves both ends; whether the stream came from `accept`
//! or `connect` makes no difference.
//!
//! # Example
//!
//! ```no_run
//! use ampwire::codec::{Fields, Schema, ValueType};
//! use ampwire::handler::CommandSchema;
//! use ampwire::transport::tcp;
//! use ampwire::ConnectionBuilder;
//!
//! # async fn run() -> ampwire::error::Result<()> {
//! let sum = CommandSchema::new(
//!     "Sum",
//!     Schema::new().field("a", ValueType::Integer).field("b", ValueType::Integer),
//!     Schema::new().field("total", ValueType::Integer),
//! );
//!
//! let stream = tcp::connect("127.0.0.1", 7113).await?;
//! let connection = ConnectionBuilder::new().declare(sum).start(stream)?;
//!
//! let args = Fields::new().with("a", 1).with("b", 2);
//! let reply = connection.peer().call("Sum", args).await?;
//! println!("{:?}", reply.get("total"));
//!
//! connection.peer().close();
//! connection.wait_for_shutdown().await
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::codec::Fields;
use crate::config::ConnectionConfig;
use crate::error::{AmpError, Result};
use crate::handler::{CallContext, CommandRegistry, CommandSchema, Handler, HandlerResult};
use crate::peer::Peer;
use crate::protocol::{FrameBuffer, Message};
use crate::transport::Transport;
use crate::writer::spawn_writer_task;

/// Read buffer size per connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Builder for configuring and starting a connection.
///
/// Registration errors (duplicate or empty names, invalid schemas) are kept
/// and reported by [`start`](Self::start).
pub struct ConnectionBuilder {
    registry: CommandRegistry,
    config: ConnectionConfig,
    error: Option<AmpError>,
}

impl ConnectionBuilder {
    /// Create a new connection builder.
    pub fn new() -> Self {
        Self {
            registry: CommandRegistry::new(),
            config: ConnectionConfig::default(),
            error: None,
        }
    }

    /// Register a command this side answers.
    pub fn command<F, Fut>(mut self, schema: CommandSchema, handler: F) -> Self
    where
        F: Fn(Fields, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let result = self.registry.register(schema, handler);
        self.keep_first_error(result);
        self
    }

    /// Register a command this side answers, with a shared handler.
    pub fn handler(mut self, schema: CommandSchema, handler: Arc<dyn Handler>) -> Self {
        let result = self.registry.register_handler(schema, handler);
        self.keep_first_error(result);
        self
    }

    /// Declare a command that only the peer answers.
    pub fn declare(mut self, schema: CommandSchema) -> Self {
        let result = self.registry.declare(schema);
        self.keep_first_error(result);
        self
    }

    /// Set limits and writer tuning.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    fn keep_first_error(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }

    /// Start serving the stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S: Transport>(self, stream: S) -> Result<Connection> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Connection::start(stream, Arc::new(self.registry), self.config)
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running connection.
///
/// Use [`peer`](Self::peer) to issue calls or close the connection and
/// [`wait_for_shutdown`](Self::wait_for_shutdown) to wait for it to end.
pub struct Connection {
    peer: Peer,
    task: JoinHandle<Result<()>>,
}

impl Connection {
    /// Create a new connection builder.
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    fn start<S: Transport>(
        stream: S,
        registry: Arc<CommandRegistry>,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let (reader, write_half) = tokio::io::split(stream);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (writer, writer_task) =
            spawn_writer_task(write_half, config.writer_config(), shutdown_rx);

        let peer = Peer::new(registry, writer, shutdown_tx);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_handlers.max(1)));

        let task = tokio::spawn(Self::run(
            peer.clone(),
            reader,
            writer_task,
            semaphore,
            config.max_body_size,
        ));

        Ok(Self { peer, task })
    }

    /// Handle to the remote side.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Wait for the connection to end.
    ///
    /// Returns `Ok(())` after an orderly close by either side, or the first
    /// fatal error that tore the connection down.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(AmpError::Transport(std::io::Error::other(e))),
        }
    }

    async fn run<R>(
        peer: Peer,
        reader: R,
        mut writer_task: JoinHandle<Result<()>>,
        semaphore: Arc<Semaphore>,
        max_body_size: u32,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut writer_done = false;

        let outcome = tokio::select! {
            result = Self::read_loop(&peer, reader, semaphore, max_body_size) => result,
            joined = &mut writer_task => {
                writer_done = true;
                flatten(joined)
            }
        };

        match outcome {
            Ok(()) => peer.close(),
            Err(e) => peer.abort(e),
        }

        let failed = peer.fail_pending();
        if failed > 0 {
            tracing::debug!(failed, "failed pending calls on teardown");
        }

        if !writer_done {
            if let Err(e) = flatten(writer_task.await) {
                tracing::debug!(error = %e, "writer stopped with error");
            }
        }

        match peer.take_failure() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Main read loop - reads messages and dispatches them.
    ///
    /// Returns `Ok(())` on end of stream or local close.
    async fn read_loop<R>(
        peer: &Peer,
        mut reader: R,
        semaphore: Arc<Semaphore>,
        max_body_size: u32,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frame_buffer = FrameBuffer::with_max_body(max_body_size);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = tokio::select! {
                read = reader.read(&mut buf) => read?,
                _ = peer.closed() => return Ok(()),
            };
            if n == 0 {
                tracing::debug!("peer closed the stream");
                if !frame_buffer.is_empty() {
                    return Err(AmpError::ConnectionLost);
                }
                return Ok(());
            }

            for message in frame_buffer.push(&buf[..n])? {
                if message.is_call() {
                    Self::spawn_call(peer, message, &semaphore).await?;
                } else {
                    peer.handle_incoming(message).await?;
                }
            }
        }
    }

    /// Dispatch a call on its own task, bounded by the handler semaphore.
    async fn spawn_call(peer: &Peer, message: Message, semaphore: &Arc<Semaphore>) -> Result<()> {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AmpError::ConnectionLost)?;
        let peer = peer.clone();

        tokio::spawn(async move {
            // Permit is held until this task completes
            let _permit = permit;

            let dispatched = match peer.handle_incoming(message).await {
                Ok(Some(dispatched)) => dispatched,
                Ok(None) => return,
                Err(e) => return peer.abort(e),
            };

            match peer.send(&dispatched.message).await {
                Ok(()) => {
                    if let Some(follow_up) = dispatched.follow_up {
                        peer.run_follow_up(follow_up);
                    }
                }
                Err(AmpError::ConnectionLost) => {
                    tracing::debug!("connection closed before reply was queued")
                }
                Err(e) => peer.abort(e),
            }
        });
        Ok(())
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(AmpError::Transport(std::io::Error::other(e))),
    }
}
