//! Per-connection writer task.
//!
//! The event loop never touches a socket. Each connection owns a writer
//! task fed through an mpsc channel; the task drains whatever is queued
//! and writes it with one vectored write per batch.
//!
//! ```text
//! Event loop ──► WriterHandle ──► mpsc ──► writer task ──► socket
//! ```
//!
//! The loop only uses [`WriterHandle::try_send`], so a slow peer never
//! stalls it: a full queue surfaces as [`ProcwireError::WriterFull`] and
//! the connection is dropped.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ProcwireError, Result};
use crate::protocol::OutboundFrame;

/// Default maximum frames queued for one connection.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Most frames written by one vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// Limits for one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Frames queued but not yet written before sends are refused.
    pub max_pending_frames: usize,
    /// Capacity of the channel feeding the writer task.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Sending side of a connection's writer task.
///
/// The task ends once every handle is dropped and the queue is written.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    queued: Arc<AtomicUsize>,
    max_queued: usize,
}

impl WriterHandle {
    /// Queue a frame without waiting.
    ///
    /// Fails with `WriterFull` when the connection has too much unwritten
    /// output and with `ConnectionClosed` when the task is gone.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.queued.fetch_add(1, Ordering::AcqRel) >= self.max_queued {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            return Err(ProcwireError::WriterFull);
        }

        self.tx.try_send(frame).map_err(|e| {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            match e {
                mpsc::error::TrySendError::Full(_) => ProcwireError::WriterFull,
                mpsc::error::TrySendError::Closed(_) => ProcwireError::ConnectionClosed,
            }
        })
    }

    /// Queue a frame, waiting for channel capacity.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).await.map_err(|_| {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            ProcwireError::ConnectionClosed
        })
    }

    /// Frames queued but not yet written.
    pub fn pending_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }
}

/// Spawn the writer task for `writer`.
///
/// The task flushes and shuts `writer` down after the last handle is
/// dropped; a write error ends it early with that error.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let queued = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        queued: queued.clone(),
        max_queued: config.max_pending_frames,
    };
    let task = tokio::spawn(writer_loop(rx, writer, queued));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    queued: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    while rx.recv_many(&mut batch, MAX_BATCH_SIZE).await > 0 {
        write_batch(&mut writer, &batch).await?;
        queued.fetch_sub(batch.len(), Ordering::AcqRel);
        batch.clear();
    }

    // Peer may already be gone
    let _ = writer.shutdown().await;
    Ok(())
}

/// Write every header and payload in `batch`, resuming after short writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut slices: Vec<IoSlice<'_>> = batch
        .iter()
        .flat_map(|frame| [IoSlice::new(&frame.header), IoSlice::new(&frame.payload)])
        .filter(|slice| !slice.is_empty())
        .collect();

    let mut remaining = &mut slices[..];
    while !remaining.is_empty() {
        let written = writer.write_vectored(remaining).await?;
        if written == 0 {
            return Err(ProcwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "peer stopped accepting data",
            )));
        }
        IoSlice::advance_slices(&mut remaining, written);
    }

    writer.flush().await?;
    Ok(())
}
