//! Cloneable handle to a server's shared state.
//!
//! Everything a handler or worker thread may do to a running server goes
//! through [`ServerHandle`]: request exit, answer deferred requests, close
//! a connection. All of it is safe to call from any thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::Notify;

use crate::error::Result;
use crate::pending::{PendingResponseStore, PendingToken};
use crate::protocol::{Fault, Response};
use crate::source::SourceId;

/// Lifecycle of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    /// Built, not serving. Registration and binding allowed.
    Created = 0,
    /// Event loop running.
    Running = 1,
    /// Exit observed, cleanup in progress.
    Exiting = 2,
    /// Terminal.
    Stopped = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServerState::Created,
            1 => ServerState::Running,
            2 => ServerState::Exiting,
            _ => ServerState::Stopped,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Created => "created",
            ServerState::Running => "running",
            ServerState::Exiting => "exiting",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub(crate) struct Shared {
    state: AtomicU8,
    exit_requested: AtomicBool,
    store: PendingResponseStore,
    wakeup: Notify,
    hangups: Mutex<Vec<SourceId>>,
}

/// Handle to a server, shareable with handlers and worker threads.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ServerState::Created as u8),
                exit_requested: AtomicBool::new(false),
                store: PendingResponseStore::new(),
                wakeup: Notify::new(),
                hangups: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A handle not attached to any server, for exercising handlers.
    pub fn detached() -> Self {
        Self::new()
    }

    /// Ask the loop to stop.
    ///
    /// Idempotent. Requests not yet dispatched are dropped; responses the
    /// current turn already produced are still written.
    pub fn exit(&self) {
        if !self.shared.exit_requested.swap(true, Ordering::AcqRel) {
            tracing::debug!("Exit requested");
        }
        self.shared.wakeup.notify_one();
    }

    pub fn exit_requested(&self) -> bool {
        self.shared.exit_requested.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Number of deferred requests still waiting for an answer.
    pub fn pending_requests(&self) -> usize {
        self.shared.store.pending_count()
    }

    /// Answer the oldest deferred request of `source` with `value`.
    ///
    /// Fails with `UnknownToken` if `source` has nothing pending.
    pub fn queue_response(&self, source: SourceId, value: impl Into<Value>) -> Result<()> {
        self.shared
            .store
            .resolve_source(source, Response::Success(value.into()))?;
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Answer the oldest deferred request of `source` with a fault.
    pub fn queue_fault(&self, source: SourceId, code: i32, message: impl Into<String>) -> Result<()> {
        self.shared
            .store
            .resolve_source(source, Response::Fault(Fault::new(code, message)))?;
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Answer the deferred request identified by `token`.
    ///
    /// Fails with `UnknownToken` on a second call for the same token.
    pub fn resolve(&self, token: &PendingToken, response: Response) -> Result<()> {
        self.shared.store.resolve(token, response)?;
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Close `source` once the responses already queued for it are written.
    pub fn hangup(&self, source: SourceId) {
        self.shared
            .hangups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(source);
        self.shared.wakeup.notify_one();
    }

    /// Unregister an auxiliary source or close a connection.
    ///
    /// Takes effect at the end of the loop's current turn, like
    /// [`hangup`](Self::hangup).
    pub fn remove_source(&self, source: SourceId) {
        self.hangup(source);
    }

    pub(crate) fn store(&self) -> &PendingResponseStore {
        &self.shared.store
    }

    pub(crate) fn set_state(&self, state: ServerState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; fails if the current state is not `from`.
    pub(crate) fn transition(&self, from: ServerState, to: ServerState) -> std::result::Result<(), ServerState> {
        self.shared
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ServerState::from_u8)
    }

    pub(crate) fn take_hangups(&self) -> Vec<SourceId> {
        std::mem::take(
            &mut *self
                .shared
                .hangups
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub(crate) async fn woken(&self) {
        self.shared.wakeup.notified().await
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("state", &self.state())
            .field("exit_requested", &self.exit_requested())
            .field("pending", &self.pending_requests())
            .finish()
    }
}
