//! Bookkeeping for deferred ("postponed") requests.
//!
//! A handler that cannot answer immediately leaves a pending entry here.
//! Whoever finishes the work (the loop, another handler, a worker thread)
//! resolves the entry; the loop drains resolved entries once per turn and
//! writes them to their connections.
//!
//! The store is the only structure shared with worker threads. One mutex
//! guards it and is held only for the map mutation itself.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{ProcwireError, Result};
use crate::protocol::Response;
use crate::source::SourceId;

/// Handle to one deferred request.
///
/// Cheap to copy and `Send`, so it can be moved into a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingToken {
    id: u64,
    source: SourceId,
    request_id: u32,
}

impl PendingToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Connection the response goes to.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Request id the response answers.
    pub fn request_id(&self) -> u32 {
        self.request_id
    }
}

/// A resolved response waiting to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyResponse {
    pub source: SourceId,
    pub request_id: u32,
    pub response: Response,
}

#[derive(Default)]
struct StoreInner {
    next_id: u64,
    pending: HashMap<u64, PendingToken>,
    ready: VecDeque<(u64, ReadyResponse)>,
}

/// Thread-safe store of deferred requests.
#[derive(Default)]
pub struct PendingResponseStore {
    inner: Mutex<StoreInner>,
}

impl PendingResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoned by a panicking worker: the map itself is still consistent.
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that `request_id` on `source` will be answered later.
    pub fn defer(&self, source: SourceId, request_id: u32) -> PendingToken {
        let mut inner = self.lock();
        inner.next_id += 1;
        let token = PendingToken {
            id: inner.next_id,
            source,
            request_id,
        };
        inner.pending.insert(token.id, token);
        token
    }

    /// Mark a deferred request ready with `response`.
    ///
    /// Fails with [`ProcwireError::UnknownToken`] if the token was never
    /// issued by this store, was already resolved, or was reclaimed
    /// because its connection closed.
    pub fn resolve(&self, token: &PendingToken, response: Response) -> Result<()> {
        let mut inner = self.lock();
        match inner.pending.remove(&token.id) {
            Some(entry) if entry == *token => {
                inner.ready.push_back((
                    entry.id,
                    ReadyResponse {
                        source: entry.source,
                        request_id: entry.request_id,
                        response,
                    },
                ));
                Ok(())
            }
            Some(entry) => {
                // Same id, different origin: not ours. Put it back.
                inner.pending.insert(entry.id, entry);
                Err(unknown(token.source, Some(token.id)))
            }
            None => Err(unknown(token.source, Some(token.id))),
        }
    }

    /// Resolve the oldest deferred request of `source`.
    pub fn resolve_source(&self, source: SourceId, response: Response) -> Result<PendingToken> {
        let mut inner = self.lock();
        let oldest = inner
            .pending
            .values()
            .filter(|t| t.source == source)
            .min_by_key(|t| t.id)
            .copied()
            .ok_or_else(|| unknown(source, None))?;

        inner.pending.remove(&oldest.id);
        inner.ready.push_back((
            oldest.id,
            ReadyResponse {
                source,
                request_id: oldest.request_id,
                response,
            },
        ));
        Ok(oldest)
    }

    /// Withdraw a reservation, whether still pending or already resolved.
    ///
    /// Returns `true` if something was removed.
    pub fn cancel(&self, token: &PendingToken) -> bool {
        let mut inner = self.lock();
        if inner.pending.remove(&token.id).is_some() {
            return true;
        }
        let before = inner.ready.len();
        inner.ready.retain(|(id, _)| *id != token.id);
        inner.ready.len() != before
    }

    /// Drop every pending and ready entry of a closed source.
    ///
    /// Returns the number of entries removed.
    pub fn forget_source(&self, source: SourceId) -> usize {
        let mut inner = self.lock();
        let before = inner.pending.len() + inner.ready.len();
        inner.pending.retain(|_, t| t.source != source);
        inner.ready.retain(|(_, r)| r.source != source);
        before - inner.pending.len() - inner.ready.len()
    }

    /// Atomically take every resolved response, in resolution order.
    pub fn drain_ready(&self) -> Vec<ReadyResponse> {
        let mut inner = self.lock();
        inner.ready.drain(..).map(|(_, r)| r).collect()
    }

    /// Number of deferred requests not yet resolved.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of resolved responses waiting for the next drain.
    pub fn ready_count(&self) -> usize {
        self.lock().ready.len()
    }

    /// Whether `source` has at least one unresolved deferred request.
    pub fn has_pending(&self, source: SourceId) -> bool {
        self.lock().pending.values().any(|t| t.source == source)
    }
}

fn unknown(source: SourceId, token: Option<u64>) -> ProcwireError {
    ProcwireError::UnknownToken {
        connection: source,
        token,
    }
}
