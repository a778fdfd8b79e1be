//! Listening endpoint description.

use std::fmt;
#[cfg(unix)]
use std::path::PathBuf;

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP host and port. Port 0 picks an ephemeral port at bind time.
    Tcp { host: String, port: u16 },
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix { path: PathBuf },
}

impl Endpoint {
    /// TCP endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Unix domain socket endpoint.
    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix { path: path.into() }
    }

    /// TCP port, if this is a TCP endpoint.
    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Tcp { port, .. } => Some(*port),
            #[cfg(unix)]
            Endpoint::Unix { .. } => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            #[cfg(unix)]
            Endpoint::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Generate a unique socket path for this process.
///
/// Format: `{tmp}/procwire-{pid}-{random}.sock`
#[cfg(unix)]
pub fn generate_socket_path() -> PathBuf {
    let name = format!("procwire-{}-{:x}.sock", std::process::id(), rand_u64());
    std::env::temp_dir().join(name)
}

/// Simple random u64 using system time, process ID and a counter.
#[cfg(unix)]
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ count.rotate_left(32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Endpoint::tcp("127.0.0.1", 43434).to_string(), "tcp://127.0.0.1:43434");
        #[cfg(unix)]
        assert_eq!(
            Endpoint::unix("/tmp/x.sock").to_string(),
            "unix:///tmp/x.sock"
        );
    }

    #[test]
    fn test_port() {
        assert_eq!(Endpoint::tcp("localhost", 8).port(), Some(8));
        #[cfg(unix)]
        assert_eq!(Endpoint::unix("/tmp/x.sock").port(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_generate_socket_path_format() {
        let path = generate_socket_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();

        assert!(name.starts_with("procwire-"));
        assert!(name.ends_with(".sock"));
        assert!(name.contains(&std::process::id().to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_generate_socket_path_uniqueness() {
        let paths: Vec<PathBuf> = (0..10).map(|_| generate_socket_path()).collect();

        for (i, p1) in paths.iter().enumerate() {
            for p2 in &paths[i + 1..] {
                assert_ne!(p1, p2);
            }
        }
    }
}
