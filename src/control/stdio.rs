//! Line-oriented auxiliary input.
//!
//! Auxiliary readers are split into lines on a background task; the lines
//! are handed to the loop, which runs the source's [`LineCallback`].
//!
//! Stdin is read on a plain thread instead. A blocking read cannot be
//! cancelled, and a runtime task stuck in one would keep the runtime
//! from shutting down.

use std::io::BufRead;
use std::thread;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::handle::ServerHandle;
use crate::source::{LineCallback, LoopEvent, SourceId};

/// Callback that stops the server when a line starts with `key`.
///
/// Leading whitespace is ignored. The callback unregisters itself after
/// requesting exit.
pub fn quit_on_key(key: char) -> impl LineCallback {
    move |server: &ServerHandle, line: &str| {
        if line.trim_start().starts_with(key) {
            tracing::info!("Quit key '{}' received", key);
            server.exit();
            false
        } else {
            true
        }
    }
}

/// Spawn the task that feeds `reader` to the loop line by line.
pub(crate) fn spawn_line_reader<R>(
    source: SourceId,
    reader: R,
    events: mpsc::Sender<LoopEvent>,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            let event = match lines.next_line().await {
                Ok(Some(line)) => LoopEvent::Line { source, line },
                Ok(None) => LoopEvent::AuxEnded { source, error: None },
                Err(e) => LoopEvent::AuxEnded {
                    source,
                    error: Some(e),
                },
            };
            let ended = matches!(event, LoopEvent::AuxEnded { .. });
            if events.send(event).await.is_err() || ended {
                break;
            }
        }
    })
}

/// Read stdin line by line on a detached thread.
pub(crate) fn spawn_stdin_reader(
    source: SourceId,
    events: mpsc::Sender<LoopEvent>,
) -> std::io::Result<()> {
    let reader = std::io::BufReader::new(std::io::stdin());
    spawn_blocking_line_reader(source, reader, events).map(drop)
}

/// Feed a blocking reader to the loop from a dedicated thread.
///
/// The thread ends at end of input or once the loop is gone.
pub(crate) fn spawn_blocking_line_reader<R>(
    source: SourceId,
    reader: R,
    events: mpsc::Sender<LoopEvent>,
) -> std::io::Result<thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name(format!("procwire-lines-{}", source.get()))
        .spawn(move || {
            let mut lines = reader.lines();
            loop {
                let event = match lines.next() {
                    Some(Ok(line)) => LoopEvent::Line { source, line },
                    None => LoopEvent::AuxEnded { source, error: None },
                    Some(Err(e)) => LoopEvent::AuxEnded {
                        source,
                        error: Some(e),
                    },
                };
                let ended = matches!(event, LoopEvent::AuxEnded { .. });
                if events.blocking_send(event).is_err() || ended {
                    break;
                }
            }
        })
}
