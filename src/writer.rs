//! Dedicated writer task for outbound messages.
//!
//! Every outbound message on a connection goes through one writer task fed by
//! an mpsc channel, so handlers, follow-up calls and the session never contend
//! for the stream and ready frames are batched into single vectored writes.
//!
//! # Architecture
//!
//! ```text
//! Handler 1 ─┐
//! Handler 2 ─┼─► WriterHandle ─► mpsc ─► Writer Task ─► Stream
//! Session   ─┘
//! ```
//!
//! A frame holds one credit from a semaphore of `max_pending_frames` permits
//! until it has been written. Senders that find no credit left wait up to
//! `backpressure_timeout`.
//!
//! When the shutdown signal fires, the task writes whatever is already queued,
//! then shuts the write half down. A reply queued before `close()` is
//! therefore always delivered.

use std::io::IoSlice;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{AmpError, Result};
use crate::protocol::{Message, HEADER_SIZE};

/// Default maximum queued frames before senders wait.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames written per vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// A message encoded and ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Encoded 9-byte header.
    pub header: [u8; HEADER_SIZE],
    /// Encoded body.
    pub body: Bytes,
}

impl OutboundFrame {
    /// Encode a message into an outbound frame.
    pub fn from_message(message: &Message) -> Result<Self> {
        let (header, body) = message.to_frame_parts()?;
        Ok(Self { header, body })
    }

    /// Bytes this frame occupies on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

/// A frame in the queue together with the credit it holds.
struct Queued {
    frame: OutboundFrame,
    _credit: OwnedSemaphorePermit,
}

/// Writer task tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    /// Queued frames allowed before senders wait.
    pub max_pending_frames: usize,
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long a sender waits for a credit.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Cloneable sender side of the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Queued>,
    credits: Arc<Semaphore>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    /// Queue a frame for writing.
    ///
    /// Fails with `BackpressureTimeout` if no credit frees up in time and
    /// with `ConnectionLost` once the writer has stopped.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        let credit = match tokio::time::timeout(self.timeout, self.credits.clone().acquire_owned())
            .await
        {
            Ok(Ok(credit)) => credit,
            Ok(Err(_closed)) => return Err(AmpError::ConnectionLost),
            Err(_elapsed) => {
                tracing::warn!(pending = self.pending_count(), "outbound queue full");
                return Err(AmpError::BackpressureTimeout);
            }
        };

        self.tx
            .send(Queued {
                frame,
                _credit: credit,
            })
            .await
            .map_err(|_| AmpError::ConnectionLost)
    }

    /// Whether a sender would have to wait right now.
    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.credits.available_permits() == 0
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.max_pending
            .saturating_sub(self.credits.available_permits())
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task runs until every handle is dropped or `shutdown` becomes `true`;
/// in both cases queued frames are flushed and the write half is shut down.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
    shutdown: watch::Receiver<bool>,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let max_pending = config.max_pending_frames.max(1);
    let credits = Arc::new(Semaphore::new(max_pending));

    let handle = WriterHandle {
        tx,
        credits: credits.clone(),
        max_pending,
        timeout: config.backpressure_timeout,
    };

    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer, shutdown).await;
        // Wake senders still waiting for a credit
        credits.close();
        result
    });

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Queued>,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        tokio::select! {
            biased;
            queued = rx.recv() => match queued {
                Some(queued) => batch.push(queued),
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        fill_batch(&mut rx, &mut batch);
        write_batch(&mut writer, &mut batch).await?;
    }

    // Frames queued before the shutdown signal still go out
    rx.close();
    loop {
        fill_batch(&mut rx, &mut batch);
        if batch.is_empty() {
            break;
        }
        write_batch(&mut writer, &mut batch).await?;
    }

    writer.shutdown().await?;
    tracing::debug!("writer task stopped");
    Ok(())
}

fn fill_batch(rx: &mut mpsc::Receiver<Queued>, batch: &mut Vec<Queued>) {
    while batch.len() < MAX_BATCH_SIZE {
        match rx.try_recv() {
            Ok(queued) => batch.push(queued),
            Err(_) => break,
        }
    }
}

/// Write and flush every frame in `batch`, then release their credits.
async fn write_batch<W>(writer: &mut W, batch: &mut Vec<Queued>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let parts: Vec<&[u8]> = batch
        .iter()
        .flat_map(|queued| [&queued.frame.header[..], &queued.frame.body[..]])
        .collect();
    write_all_vectored(writer, &parts).await?;
    writer.flush().await?;

    batch.clear();
    Ok(())
}

/// `write_all` over several buffers, resuming after short writes.
async fn write_all_vectored<W>(writer: &mut W, parts: &[&[u8]]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut index = 0;
    let mut offset = 0;

    loop {
        while index < parts.len() && offset == parts[index].len() {
            index += 1;
            offset = 0;
        }
        if index == parts.len() {
            return Ok(());
        }

        let slices: Vec<IoSlice<'_>> = std::iter::once(&parts[index][offset..])
            .chain(parts[index + 1..].iter().copied())
            .filter(|part| !part.is_empty())
            .map(IoSlice::new)
            .collect();

        let mut written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(AmpError::Transport(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "stream accepted no bytes",
            )));
        }

        while written > 0 && index < parts.len() {
            let left = parts[index].len() - offset;
            if written < left {
                offset += written;
                written = 0;
            } else {
                written -= left;
                index += 1;
                offset = 0;
            }
        }
    }
}
