//! Handler module - method registration and the handler contract.
//!
//! Provides:
//! - [`MethodRegistry`] - maps method names to handlers
//! - [`CallContext`] - what a handler knows about its call, and deferral
//! - [`Outcome`] - immediate value, fault, or deferral
//!
//! # Example
//!
//! ```
//! use procwire_server::handler::{MethodRegistry, Outcome};
//!
//! let mut registry = MethodRegistry::new();
//!
//! registry.register_fn("echo", |_ctx, params| Outcome::value(params));
//! registry.register_fn("faulty", |_ctx, _params| Outcome::fault(23, "blah"));
//! registry.register_fn("later", |ctx, _params| {
//!     let _token = ctx.defer();
//!     Outcome::deferred()
//! });
//! ```

mod context;
mod outcome;
mod registry;

pub use context::CallContext;
pub use outcome::{HandlerError, HandlerResult, Outcome};
pub use registry::{FnHandler, Handler, MethodRegistry, TypedHandler};

pub use crate::protocol::Fault;
