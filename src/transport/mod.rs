//! Transport module - listening sockets for the server.
//!
//! Provides abstraction over:
//! - TCP sockets
//! - Unix Domain Sockets (Linux/macOS)

mod endpoint;
mod listener;

pub use endpoint::{generate_socket_path, Endpoint};
pub use listener::{BoxedReader, BoxedWriter, Listener, TransportStream};
