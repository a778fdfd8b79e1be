//! Request dispatcher.
//!
//! Resolves a call to its handler, runs it, and turns whatever happens into
//! exactly one [`Outcome`]. Handler errors and panics stop here: the client
//! gets a generic internal-error fault and the details go to the log.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

use crate::config::Verbosity;
use crate::error::ProcwireError;
use crate::handle::ServerHandle;
use crate::handler::{CallContext, MethodRegistry, Outcome};
use crate::protocol::Fault;
use crate::source::SourceId;

/// Outcome plus the failure behind it, if any, for the error policy.
pub(crate) struct Dispatched {
    pub outcome: Outcome,
    pub failure: Option<ProcwireError>,
}

/// Runs requests against a [`MethodRegistry`].
pub struct RequestDispatcher {
    registry: MethodRegistry,
    verbosity: Verbosity,
}

impl RequestDispatcher {
    pub fn new(registry: MethodRegistry, verbosity: Verbosity) -> Self {
        Self {
            registry,
            verbosity,
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut MethodRegistry {
        &mut self.registry
    }

    /// Dispatch one call.
    ///
    /// - unknown method: `Fault(UNKNOWN_METHOD)`, no handler runs
    /// - handler fault (returned, or a boxed `Fault` error): forwarded as is
    /// - handler deferral: the request is recorded in the pending store
    /// - handler error or panic: `Fault(INTERNAL_ERROR)`
    pub fn handle(
        &self,
        server: &ServerHandle,
        source: SourceId,
        request_id: u32,
        method: &str,
        params: Vec<Value>,
    ) -> Outcome {
        self.dispatch(server, source, request_id, method, params).outcome
    }

    pub(crate) fn dispatch(
        &self,
        server: &ServerHandle,
        source: SourceId,
        request_id: u32,
        method: &str,
        params: Vec<Value>,
    ) -> Dispatched {
        if self.verbosity.params() {
            tracing::info!("{} -> {}({:?}) [{}]", source, method, params, request_id);
        } else if self.verbosity.requests() {
            tracing::info!("{} -> {} [{}]", source, method, request_id);
        }

        let handler = match self.registry.resolve(method) {
            Ok(handler) => handler,
            Err(err) => {
                return Dispatched {
                    outcome: Outcome::Fault(Fault::unknown_method(method)),
                    failure: Some(err),
                }
            }
        };

        let ctx = CallContext::new(server, source, request_id, method, &self.registry);
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.call(&ctx, params)));
        let reserved = ctx.take_reservation();

        let (outcome, failure) = match result {
            Ok(Ok(Outcome::Deferred)) => {
                if reserved.is_none() {
                    server.store().defer(source, request_id);
                }
                tracing::debug!("{} deferred request {} ({})", source, request_id, method);
                (Outcome::Deferred, None)
            }
            Ok(Ok(outcome)) => (outcome, None),
            Ok(Err(err)) => match err.downcast::<Fault>() {
                Ok(fault) => (Outcome::Fault(*fault), None),
                Err(err) => {
                    tracing::error!("Handler '{}' failed on {}: {}", method, source, err);
                    (
                        Outcome::Fault(Fault::internal()),
                        Some(ProcwireError::Handler {
                            method: method.to_string(),
                            message: err.to_string(),
                        }),
                    )
                }
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Handler '{}' panicked on {}: {}", method, source, message);
                (
                    Outcome::Fault(Fault::internal()),
                    Some(ProcwireError::Handler {
                        method: method.to_string(),
                        message,
                    }),
                )
            }
        };

        if let (Some(token), false) = (reserved, matches!(outcome, Outcome::Deferred)) {
            server.store().cancel(&token);
        }

        if self.verbosity.payloads() {
            tracing::info!("{} <- [{}] {:?}", source, request_id, outcome);
        }

        Dispatched { outcome, failure }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Response, INTERNAL_ERROR, UNKNOWN_METHOD};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dispatcher(registry: MethodRegistry) -> RequestDispatcher {
        RequestDispatcher::new(registry, Verbosity::new(0))
    }

    #[test]
    fn test_immediate() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("echo", |_ctx, params| Outcome::value(params));
        let d = dispatcher(registry);
        let server = ServerHandle::detached();

        let outcome = d.handle(&server, SourceId::new(1), 1, "echo", vec![json!("hello")]);
        assert_eq!(outcome, Outcome::Immediate(json!(["hello"])));
    }

    #[test]
    fn test_unknown_method_never_calls_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = MethodRegistry::new();
        let counter = calls.clone();
        registry.register_fn("known", move |_ctx, _p| {
            counter.fetch_add(1, Ordering::SeqCst);
            Outcome::value(1)
        });
        let d = dispatcher(registry);
        let server = ServerHandle::detached();

        let dispatched = d.dispatch(&server, SourceId::new(1), 1, "unknown", vec![]);

        match dispatched.outcome {
            Outcome::Fault(fault) => {
                assert_eq!(fault.code, UNKNOWN_METHOD);
                assert_eq!(fault.message, "unknown command: 'unknown'");
            }
            other => panic!("expected fault, got {:?}", other),
        }
        assert!(matches!(
            dispatched.failure,
            Some(ProcwireError::UnknownMethod(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fault_forwarded_verbatim() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("faulty", |_ctx, _p| Outcome::fault(23, "blah"));
        registry.register_fn("faulty_err", |_ctx, _p| Err(Fault::new(24, "bleh").into()));
        let d = dispatcher(registry);
        let server = ServerHandle::detached();

        assert_eq!(
            d.handle(&server, SourceId::new(1), 1, "faulty", vec![]),
            Outcome::Fault(Fault::new(23, "blah"))
        );
        let dispatched = d.dispatch(&server, SourceId::new(1), 2, "faulty_err", vec![]);
        assert_eq!(dispatched.outcome, Outcome::Fault(Fault::new(24, "bleh")));
        assert!(dispatched.failure.is_none());
    }

    #[test]
    fn test_handler_error_becomes_internal_fault() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("broken", |_ctx, _p| {
            let n: i64 = "not a number".parse()?;
            Outcome::value(n)
        });
        let d = dispatcher(registry);
        let server = ServerHandle::detached();

        let dispatched = d.dispatch(&server, SourceId::new(1), 1, "broken", vec![]);
        assert_eq!(dispatched.outcome, Outcome::Fault(Fault::internal()));
        match dispatched.failure {
            Some(ProcwireError::Handler { method, .. }) => assert_eq!(method, "broken"),
            other => panic!("expected handler failure, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_is_contained() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("boom", |_ctx, _p| panic!("kaboom"));
        registry.register_fn("ok", |_ctx, _p| Outcome::value("fine"));
        let d = dispatcher(registry);
        let server = ServerHandle::detached();

        let dispatched = d.dispatch(&server, SourceId::new(1), 1, "boom", vec![]);
        match dispatched.outcome {
            Outcome::Fault(fault) => {
                assert_eq!(fault.code, INTERNAL_ERROR);
                assert!(!fault.message.contains("kaboom"));
            }
            other => panic!("expected fault, got {:?}", other),
        }
        match dispatched.failure {
            Some(ProcwireError::Handler { message, .. }) => assert_eq!(message, "kaboom"),
            other => panic!("expected handler failure, got {:?}", other),
        }

        assert_eq!(
            d.handle(&server, SourceId::new(2), 2, "ok", vec![]),
            Outcome::Immediate(json!("fine"))
        );
    }

    #[test]
    fn test_deferral_without_reservation_is_recorded() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("later", |_ctx, _p| Outcome::deferred());
        let d = dispatcher(registry);
        let server = ServerHandle::detached();

        let outcome = d.handle(&server, SourceId::new(4), 40, "later", vec![]);
        assert_eq!(outcome, Outcome::Deferred);
        assert_eq!(server.pending_requests(), 1);

        server.queue_response(SourceId::new(4), "done").unwrap();
        let ready = server.store().drain_ready();
        assert_eq!(ready[0].request_id, 40);
    }

    #[test]
    fn test_reservation_resolved_before_return() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("fast_worker", |ctx, params| {
            let token = ctx.defer();
            let server = ctx.server().clone();
            std::thread::spawn(move || server.resolve(&token, Response::Success(params.into())))
                .join()
                .unwrap()?;
            Outcome::deferred()
        });
        let d = dispatcher(registry);
        let server = ServerHandle::detached();

        let outcome = d.handle(&server, SourceId::new(1), 5, "fast_worker", vec![json!(1)]);
        assert_eq!(outcome, Outcome::Deferred);
        assert_eq!(server.pending_requests(), 0);

        let ready = server.store().drain_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].response, Response::Success(json!([1])));
    }

    #[test]
    fn test_reservation_withdrawn_when_not_deferred() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("changed_mind", |ctx, _p| {
            ctx.defer();
            Outcome::value("now")
        });
        registry.register_fn("reserve_then_panic", |ctx, _p| {
            ctx.defer();
            panic!("oops")
        });
        let d = dispatcher(registry);
        let server = ServerHandle::detached();

        assert_eq!(
            d.handle(&server, SourceId::new(1), 1, "changed_mind", vec![]),
            Outcome::Immediate(json!("now"))
        );
        d.handle(&server, SourceId::new(1), 2, "reserve_then_panic", vec![]);

        assert_eq!(server.pending_requests(), 0);
        assert!(server.store().drain_ready().is_empty());
    }
}
