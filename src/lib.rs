//! # procwire-server
//!
//! Single-threaded request server over TCP or Unix sockets.
//!
//! Clients send named method calls with positional arguments; the server
//! answers each one with a value, a structured fault, or later through a
//! deferral resolved by the loop, another handler, or a worker thread.
//!
//! ## Architecture
//!
//! - **Event loop**: one future runs every handler, one at a time
//! - **Connection tasks**: a reader and a writer task per connection move
//!   frames between the socket and the loop
//! - **Pending store**: the only structure shared with worker threads
//!
//! ## Example
//!
//! ```no_run
//! use procwire_server::{Outcome, ServerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> procwire_server::Result<()> {
//!     let mut server = ServerBuilder::new()
//!         .port(43434)
//!         .method("echo", |_ctx, params| Outcome::value(params))
//!         .method("faulty", |_ctx, _params| Outcome::fault(23, "blah"))
//!         .method("slow", |ctx, params| {
//!             let token = ctx.defer();
//!             let server = ctx.server().clone();
//!             std::thread::spawn(move || {
//!                 let _ = server.resolve(&token, procwire_server::Response::Success(params.into()));
//!             });
//!             Outcome::deferred()
//!         })
//!         .build();
//!
//!     server.serve().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod pending;
pub mod protocol;
pub mod recovery;
pub mod transport;

mod client;
mod dispatch;
mod handle;
mod server;
mod source;
mod writer;

pub use client::Client;
pub use config::{ServerConfig, Verbosity};
pub use dispatch::RequestDispatcher;
pub use error::{ProcwireError, Result};
pub use handle::{ServerHandle, ServerState};
pub use handler::{CallContext, Handler, MethodRegistry, Outcome};
pub use pending::PendingToken;
pub use protocol::{Fault, Request, Response};
pub use recovery::{ErrorAction, ErrorHook};
pub use server::{Server, ServerBuilder};
pub use source::{LineCallback, SourceId};
pub use transport::Endpoint;
pub use writer::WriterConfig;
