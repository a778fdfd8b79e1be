//! Server configuration.
//!
//! Every value has a default; [`ServerBuilder`](crate::ServerBuilder) sets
//! them through its fluent methods.

use std::time::Duration;

use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::transport::Endpoint;
use crate::writer::WriterConfig;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 43434;

/// Default bind address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default capacity of the channel between reader tasks and the loop.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Default cap on events handled in one turn.
pub const DEFAULT_MAX_EVENTS_PER_TURN: usize = 256;

/// How much of each request the dispatcher logs.
///
/// Levels run 0 to 9:
/// - 3 and up: method name of every request
/// - 5 and up: arguments too
/// - 8 and up: full response payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Verbosity(u8);

impl Verbosity {
    pub const MAX: u8 = 9;

    /// Clamped to `0..=9`.
    pub fn new(level: u8) -> Self {
        Verbosity(level.min(Self::MAX))
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    pub fn requests(&self) -> bool {
        self.0 >= 3
    }

    pub fn params(&self) -> bool {
        self.0 >= 5
    }

    pub fn payloads(&self) -> bool {
        self.0 >= 8
    }
}

/// Configuration for a [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where to listen.
    pub endpoint: Endpoint,
    /// Request logging verbosity.
    pub log_level: Verbosity,
    /// Longest a turn waits for activity. `None` blocks until something
    /// happens; `Some(Duration::ZERO)` never waits.
    pub poll_timeout: Option<Duration>,
    /// Stop when a stdin line starts with this character.
    pub quit_key: Option<char>,
    /// Per-connection writer limits.
    pub writer: WriterConfig,
    /// Largest accepted request payload.
    pub max_payload_size: u32,
    /// Capacity of the reader-to-loop event channel.
    pub event_capacity: usize,
    /// Events handled per turn before deferred responses are flushed.
    pub max_events_per_turn: usize,
    /// Install `ping`, `kill`, `usage` and the other built-in methods.
    pub admin_methods: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::tcp(DEFAULT_HOST, DEFAULT_PORT),
            log_level: Verbosity::default(),
            poll_timeout: None,
            quit_key: None,
            writer: WriterConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_events_per_turn: DEFAULT_MAX_EVENTS_PER_TURN,
            admin_methods: true,
        }
    }
}
