//! Listener over TCP or Unix domain sockets.
//!
//! # Example
//!
//! ```ignore
//! use procwire_server::transport::{Endpoint, Listener};
//!
//! let listener = Listener::bind(&Endpoint::tcp("127.0.0.1", 0)).await?;
//! let stream = listener.accept().await?;
//! ```

#[cfg(unix)]
use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use super::Endpoint;
use crate::error::{ProcwireError, Result};

/// Read half of an accepted connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an accepted connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An accepted connection, already split into halves.
pub struct TransportStream {
    /// Human-readable peer description for logs.
    pub peer: String,
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// Bound listening socket.
///
/// A Unix socket file is removed when the listener is dropped.
pub struct Listener {
    endpoint: Endpoint,
    kind: ListenerKind,
}

impl Listener {
    /// Bind the endpoint.
    ///
    /// For Unix sockets, any stale socket file at the path is removed first.
    /// Failures are reported as [`ProcwireError::Bind`].
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        let bind_err = |source: std::io::Error| ProcwireError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        match endpoint {
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))
                    .await
                    .map_err(bind_err)?;
                let local = listener.local_addr().map_err(bind_err)?;
                Ok(Self {
                    endpoint: Endpoint::tcp(host.clone(), local.port()),
                    kind: ListenerKind::Tcp(listener),
                })
            }
            #[cfg(unix)]
            Endpoint::Unix { path } => {
                remove_stale_socket(path).map_err(bind_err)?;
                let listener = UnixListener::bind(path).map_err(bind_err)?;
                Ok(Self {
                    endpoint: endpoint.clone(),
                    kind: ListenerKind::Unix(listener),
                })
            }
        }
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<TransportStream> {
        match &self.kind {
            ListenerKind::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                Ok(TransportStream {
                    peer: addr.to_string(),
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                })
            }
            #[cfg(unix)]
            ListenerKind::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                let (reader, writer) = stream.into_split();
                Ok(TransportStream {
                    peer: "unix-peer".to_string(),
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                })
            }
        }
    }

    /// The bound endpoint. For TCP the actual port is reported, so binding
    /// port 0 yields the ephemeral port chosen by the OS.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => std::fs::remove_file(path),
        Ok(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Endpoint::Unix { path } = &self.endpoint {
            let _ = std::fs::remove_file(path);
        }
    }
}
