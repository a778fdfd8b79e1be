//! Error types for procwire-server.

use thiserror::Error;

use crate::protocol::Fault;
use crate::source::SourceId;

/// Main error type for all procwire operations.
#[derive(Debug, Error)]
pub enum ProcwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (argument decoding).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, wrong flags, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No handler registered under the requested method name.
    #[error("unknown command: '{0}'")]
    UnknownMethod(String),

    /// A handler returned an error or panicked.
    #[error("handler '{method}' failed: {message}")]
    Handler { method: String, message: String },

    /// Fault answered by the remote side (client only).
    #[error(transparent)]
    Fault(#[from] Fault),

    /// Resolve referenced a deferred request that is unknown or already answered.
    #[error("no pending request for source {connection}{}", token_suffix(.token))]
    UnknownToken {
        connection: SourceId,
        token: Option<u64>,
    },

    /// Lifecycle misuse (serve twice, register while running, ...).
    #[error("invalid server state: {0}")]
    InvalidState(String),

    /// Listener could not be bound.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Outbound queue of a connection is full.
    #[error("Writer queue full")]
    WriterFull,
}

impl ProcwireError {
    /// Whether this error belongs to a single connection's transport.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProcwireError::Io(_)
                | ProcwireError::Protocol(_)
                | ProcwireError::MsgPackDecode(_)
                | ProcwireError::MsgPackEncode(_)
                | ProcwireError::ConnectionClosed
                | ProcwireError::WriterFull
        )
    }
}

fn token_suffix(token: &Option<u64>) -> String {
    token.map(|t| format!(" (token {})", t)).unwrap_or_default()
}

/// Result type alias using ProcwireError.
pub type Result<T> = std::result::Result<T, ProcwireError>;
