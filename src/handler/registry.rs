//! Method registry: maps method names to handlers.
//!
//! Names are matched exactly. Registering a name twice replaces the first
//! handler. Listing is always lexicographic so identical registries
//! enumerate identically.
//!
//! # Example
//!
//! ```
//! use procwire_server::handler::{MethodRegistry, Outcome};
//!
//! let mut registry = MethodRegistry::new();
//! registry.register_fn("echo", |_ctx, params| Outcome::value(params));
//! registry.register_typed("add", |(a, b): (i64, i64), _ctx| Outcome::value(a + b));
//!
//! assert_eq!(registry.names(), vec!["add", "echo"]);
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{CallContext, HandlerResult, Outcome};
use crate::error::{ProcwireError, Result};
use crate::protocol::Fault;

/// A registered method.
///
/// Runs on the event loop thread and must not block for long; slow work
/// belongs in a worker that answers through a deferral.
pub trait Handler: Send + Sync + 'static {
    /// Handle one call with its ordered argument list.
    fn call(&self, ctx: &CallContext<'_>, params: Vec<Value>) -> HandlerResult;
}

/// Adapter for closures taking the raw argument list.
pub struct FnHandler<F> {
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&CallContext<'_>, Vec<Value>) -> HandlerResult + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&CallContext<'_>, Vec<Value>) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, ctx: &CallContext<'_>, params: Vec<Value>) -> HandlerResult {
        (self.handler)(ctx, params)
    }
}

/// Wrapper that deserializes the argument list before calling the handler.
///
/// The arguments are decoded as one JSON array, so `T` is usually a tuple
/// (`(String,)`, `(i64, i64)`) or a `Vec`. A decode failure answers with an
/// invalid-params fault without calling the handler.
pub struct TypedHandler<F, T> {
    handler: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedHandler<F, T>
where
    F: Fn(T, &CallContext<'_>) -> HandlerResult + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> Handler for TypedHandler<F, T>
where
    F: Fn(T, &CallContext<'_>) -> HandlerResult + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    fn call(&self, ctx: &CallContext<'_>, params: Vec<Value>) -> HandlerResult {
        let parsed: T = match serde_json::from_value(Value::Array(params)) {
            Ok(v) => v,
            Err(e) => {
                return Ok(Outcome::Fault(Fault::invalid_params(format!(
                    "invalid arguments for '{}': {}",
                    ctx.method(),
                    e
                ))))
            }
        };

        (self.handler)(parsed, ctx)
    }
}

/// Registry mapping method names to handlers.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Box<dyn Handler>>,
    usage: String,
}

impl MethodRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Replaces any handler already under `name`.
    pub fn register<H: Handler>(&mut self, name: impl Into<String>, handler: H) {
        let name = name.into();
        if self.methods.insert(name.clone(), Box::new(handler)).is_some() {
            tracing::debug!("Replaced handler for method '{}'", name);
        }
    }

    /// Register a handler unless `name` is taken. Returns whether it was added.
    pub fn register_if_absent<H: Handler>(&mut self, name: impl Into<String>, handler: H) -> bool {
        let name = name.into();
        if self.methods.contains_key(&name) {
            return false;
        }
        self.methods.insert(name, Box::new(handler));
        true
    }

    /// Register a closure over the raw argument list.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&CallContext<'_>, Vec<Value>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(name, FnHandler::new(handler));
    }

    /// Register a closure over typed arguments.
    pub fn register_typed<F, T>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(T, &CallContext<'_>) -> HandlerResult + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.register(name, TypedHandler::new(handler));
    }

    /// Remove a method. Returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        self.methods.remove(name).is_some()
    }

    /// Look up a handler by exact name.
    pub fn resolve(&self, name: &str) -> Result<&dyn Handler> {
        self.methods
            .get(name)
            .map(|h| h.as_ref())
            .ok_or_else(|| ProcwireError::UnknownMethod(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered names, sorted lexicographically.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Add a paragraph to the usage text.
    pub fn append_usage(&mut self, text: &str) {
        if !self.usage.is_empty() && !self.usage.ends_with('\n') {
            self.usage.push('\n');
        }
        self.usage.push_str(text);
    }

    /// Usage text. Falls back to the command list when none was supplied.
    pub fn usage(&self) -> String {
        if self.usage.is_empty() {
            format!("commands: {}", self.names().join(", "))
        } else {
            self.usage.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ServerHandle;
    use crate::protocol::INVALID_PARAMS;
    use crate::source::SourceId;
    use serde_json::json;

    fn call(registry: &MethodRegistry, name: &str, params: Vec<Value>) -> Outcome {
        let server = ServerHandle::detached();
        let ctx = CallContext::new(&server, SourceId::new(1), 1, name, registry);
        registry.resolve(name).unwrap().call(&ctx, params).unwrap()
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = MethodRegistry::new();
        let err = registry.resolve("nonexistent").err().unwrap();
        assert!(matches!(err, ProcwireError::UnknownMethod(ref n) if n == "nonexistent"));
    }

    #[test]
    fn test_names_are_sorted() {
        let mut registry = MethodRegistry::new();
        for name in ["zeta", "alpha", "Mid", "beta"] {
            registry.register_fn(name, |_ctx, _p| Outcome::value(json!(null)));
        }

        assert_eq!(registry.names(), vec!["Mid", "alpha", "beta", "zeta"]);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("greet", |_ctx, _p| Outcome::value("first"));
        registry.register_fn("greet", |_ctx, _p| Outcome::value("second"));

        assert_eq!(registry.len(), 1);
        assert_eq!(call(&registry, "greet", vec![]), Outcome::Immediate(json!("second")));
    }

    #[test]
    fn test_register_if_absent_keeps_existing() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("ping", |_ctx, _p| Outcome::value("mine"));

        assert!(!registry.register_if_absent(
            "ping",
            FnHandler::new(|_ctx: &CallContext<'_>, _p: Vec<Value>| Outcome::value("pong"))
        ));
        assert_eq!(call(&registry, "ping", vec![]), Outcome::Immediate(json!("mine")));
    }

    #[test]
    fn test_typed_handler_decodes_tuple() {
        let mut registry = MethodRegistry::new();
        registry.register_typed("add", |(a, b): (i64, i64), _ctx| Outcome::value(a + b));

        assert_eq!(
            call(&registry, "add", vec![json!(2), json!(40)]),
            Outcome::Immediate(json!(42))
        );
    }

    #[test]
    fn test_typed_handler_bad_arguments_is_fault() {
        let mut registry = MethodRegistry::new();
        registry.register_typed("add", |(a, b): (i64, i64), _ctx| Outcome::value(a + b));

        match call(&registry, "add", vec![json!("two")]) {
            Outcome::Fault(fault) => {
                assert_eq!(fault.code, INVALID_PARAMS);
                assert!(fault.message.contains("'add'"));
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_usage_text() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("b", |_ctx, _p| Outcome::value(1));
        registry.register_fn("a", |_ctx, _p| Outcome::value(1));
        assert_eq!(registry.usage(), "commands: a, b");

        registry.append_usage("a: does a");
        registry.append_usage("b: does b");
        assert_eq!(registry.usage(), "a: does a\nb: does b");
    }

    #[test]
    fn test_remove() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("x", |_ctx, _p| Outcome::value(1));
        assert!(registry.remove("x"));
        assert!(!registry.remove("x"));
        assert!(registry.is_empty());
    }
}
