//! Built-in administrative methods and the operator console.
//!
//! # Methods
//!
//! | name          | answer                 | effect                      |
//! |---------------|------------------------|-----------------------------|
//! | `ping`        | `"pong"`               |                             |
//! | `kill`        | `"killed"`             | stops the loop              |
//! | `exit`        | `"okay"`               | stops the loop              |
//! | `usage`       | usage text             |                             |
//! | `getCommands` | sorted method names    |                             |
//! | `getclient`   | sorted method names    |                             |
//! | `leave`       | `"bye"`                | closes the caller's socket  |
//!
//! User registrations under the same names take precedence.
//!
//! # Operator console
//!
//! [`quit_on_key`] builds a line callback that stops the server when a line
//! starting with the given character arrives on stdin.

mod admin;
mod stdio;

pub use admin::{install_admin_methods, ADMIN_METHODS};
pub use stdio::quit_on_key;
pub(crate) use stdio::{spawn_line_reader, spawn_stdin_reader};
