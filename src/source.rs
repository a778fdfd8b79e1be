//! Sources tracked by the event loop.
//!
//! A source is either a client connection speaking the frame protocol or
//! an auxiliary line-oriented input (stdin, a pipe, ...) with a callback.
//! Both share one id space.

use std::fmt;

use tokio::task::JoinHandle;

use crate::error::{ProcwireError, Result};
use crate::handle::ServerHandle;
use crate::protocol::Request;
use crate::writer::WriterHandle;

/// Identifier of a connection or auxiliary source. Allocated from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub fn new(id: u64) -> Self {
        SourceId(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback attached to an auxiliary source.
///
/// Invoked on the loop for every line read. Return `true` to stay
/// registered, `false` to be removed after this call.
pub trait LineCallback: Send + 'static {
    fn on_line(&mut self, server: &ServerHandle, line: &str) -> bool;
}

impl<F> LineCallback for F
where
    F: FnMut(&ServerHandle, &str) -> bool + Send + 'static,
{
    fn on_line(&mut self, server: &ServerHandle, line: &str) -> bool {
        self(server, line)
    }
}

/// Events fed from reader tasks into the loop.
pub(crate) enum LoopEvent {
    /// A decoded request from a connection.
    Request {
        source: SourceId,
        request_id: u32,
        request: Request,
    },
    /// A connection's reader stopped. `None` means orderly EOF.
    Closed {
        source: SourceId,
        error: Option<ProcwireError>,
    },
    /// A line from an auxiliary source.
    Line { source: SourceId, line: String },
    /// An auxiliary source reached end of input or failed.
    AuxEnded {
        source: SourceId,
        error: Option<std::io::Error>,
    },
}

/// Loop-side bookkeeping for one client connection.
pub(crate) struct Connection {
    pub peer: String,
    pub writer: WriterHandle,
    pub reader_task: JoinHandle<()>,
    pub writer_task: JoinHandle<Result<()>>,
}

/// Loop-side bookkeeping for one auxiliary source.
///
/// `task` is `None` until the loop starts and spawns the line reader.
pub(crate) struct AuxSource {
    pub callback: Box<dyn LineCallback>,
    pub task: Option<JoinHandle<()>>,
}
