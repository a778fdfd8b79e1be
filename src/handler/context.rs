//! Call context for handlers.
//!
//! Gives a handler the server handle, the originating source and request,
//! and the means to postpone its answer.
//!
//! # Example
//!
//! ```ignore
//! // Answer from a worker thread.
//! registry.register_fn("slow", |ctx, params| {
//!     let token = ctx.defer();
//!     let server = ctx.server().clone();
//!     std::thread::spawn(move || {
//!         let _ = server.resolve(&token, Response::Success(params.into()));
//!     });
//!     Outcome::deferred()
//! });
//! ```

use std::cell::Cell;

use super::MethodRegistry;
use crate::handle::ServerHandle;
use crate::pending::PendingToken;
use crate::source::SourceId;

/// Context passed to every handler invocation.
///
/// Lives only for the duration of the call. Anything a worker needs later
/// (server handle, token) must be cloned or copied out of it.
pub struct CallContext<'a> {
    server: &'a ServerHandle,
    source: SourceId,
    request_id: u32,
    method: &'a str,
    registry: &'a MethodRegistry,
    reservation: Cell<Option<PendingToken>>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        server: &'a ServerHandle,
        source: SourceId,
        request_id: u32,
        method: &'a str,
        registry: &'a MethodRegistry,
    ) -> Self {
        Self {
            server,
            source,
            request_id,
            method,
            registry,
            reservation: Cell::new(None),
        }
    }

    /// Handle to the running server.
    #[inline]
    pub fn server(&self) -> &ServerHandle {
        self.server
    }

    /// Source the request arrived on.
    #[inline]
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Request id assigned by the client.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Method name as called.
    #[inline]
    pub fn method(&self) -> &str {
        self.method
    }

    /// Sorted names of every registered method.
    pub fn method_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Usage text of the registry.
    pub fn usage(&self) -> String {
        self.registry.usage()
    }

    /// Reserve the deferred slot for this request now and return its token.
    ///
    /// The slot is live as soon as this returns, so the token can be
    /// resolved (even from another thread) before the handler itself
    /// returns. Calling it again returns the same token. The handler must
    /// then return [`Outcome::Deferred`](super::Outcome::Deferred); any
    /// other outcome withdraws the reservation.
    pub fn defer(&self) -> PendingToken {
        if let Some(token) = self.reservation.get() {
            return token;
        }
        let token = self.server.store().defer(self.source, self.request_id);
        self.reservation.set(Some(token));
        token
    }

    pub(crate) fn take_reservation(&self) -> Option<PendingToken> {
        self.reservation.take()
    }
}
