//! Server builder and event loop.
//!
//! The [`ServerBuilder`] provides a fluent API for configuring methods and
//! limits. The [`Server`] owns the loop:
//! 1. Bind the listener (unless [`Server::bind`] already did)
//! 2. Accept connections, spawning a reader and a writer task for each
//! 3. Dispatch requests one at a time on the loop
//! 4. Flush deferred responses once per turn
//! 5. On exit, clean up exactly once
//!
//! # Example
//!
//! ```no_run
//! use procwire_server::{Outcome, ServerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = ServerBuilder::new()
//!         .port(43434)
//!         .method("echo", |_ctx, params| Outcome::value(params))
//!         .typed("add", |(a, b): (i64, i64), _ctx| Outcome::value(a + b))
//!         .quit_on('q')
//!         .build();
//!
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ServerConfig, Verbosity, DEFAULT_HOST, DEFAULT_PORT};
use crate::control::{install_admin_methods, quit_on_key, spawn_line_reader, spawn_stdin_reader};
use crate::dispatch::{Dispatched, RequestDispatcher};
use crate::error::{ProcwireError, Result};
use crate::handle::{ServerHandle, ServerState};
use crate::handler::{CallContext, Handler, HandlerResult, MethodRegistry};
use crate::protocol::{FrameBuffer, Request, Response};
use crate::recovery::{ErrorHook, ErrorPolicy};
use crate::source::{AuxSource, Connection, LineCallback, LoopEvent, SourceId};
use crate::transport::{BoxedReader, Endpoint, Listener, TransportStream};
use crate::writer::spawn_writer_task;

/// Longest cleanup waits for a connection's queued responses to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Read buffer size for connection readers.
const READ_BUFFER_SIZE: usize = 64 * 1024;

type CleanupHook = Box<dyn FnOnce() + Send>;

/// Builder for configuring and creating a [`Server`].
///
/// Nothing is bound until [`Server::bind`] or [`Server::serve`].
pub struct ServerBuilder {
    config: ServerConfig,
    registry: MethodRegistry,
    error_hook: Option<Box<dyn ErrorHook>>,
    cleanup: Vec<CleanupHook>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: MethodRegistry::new(),
            error_hook: None,
            cleanup: Vec::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Listen on TCP `port`, keeping the configured host.
    ///
    /// Port 0 picks an ephemeral port; see [`Server::local_endpoint`].
    pub fn port(mut self, port: u16) -> Self {
        let host = match &self.config.endpoint {
            Endpoint::Tcp { host, .. } => host.clone(),
            #[cfg(unix)]
            Endpoint::Unix { .. } => DEFAULT_HOST.to_string(),
        };
        self.config.endpoint = Endpoint::tcp(host, port);
        self
    }

    /// Listen on TCP `host`, keeping the configured port.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        let port = self.config.endpoint.port().unwrap_or(DEFAULT_PORT);
        self.config.endpoint = Endpoint::tcp(host, port);
        self
    }

    /// Listen on an arbitrary endpoint (TCP or Unix socket).
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.config.endpoint = endpoint;
        self
    }

    /// Request logging verbosity, 0 to 9.
    pub fn log_level(mut self, level: u8) -> Self {
        self.config.log_level = Verbosity::new(level);
        self
    }

    /// Longest a turn waits for activity. `None` blocks.
    pub fn poll_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// Stop the server when a stdin line starts with `key`.
    pub fn quit_on(mut self, key: char) -> Self {
        self.config.quit_key = Some(key);
        self
    }

    /// Maximum responses queued per connection before it is dropped.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Writer channel capacity per connection.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Largest accepted request payload in bytes.
    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.config.max_payload_size = size;
        self
    }

    /// Events handled per turn before deferred responses are flushed.
    pub fn max_events_per_turn(mut self, limit: usize) -> Self {
        self.config.max_events_per_turn = limit.max(1);
        self
    }

    /// Register a closure over the raw argument list.
    pub fn method<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, Vec<Value>) -> HandlerResult + Send + Sync + 'static,
    {
        self.registry.register_fn(name, handler);
        self
    }

    /// Register a closure over typed arguments.
    pub fn typed<F, T>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T, &CallContext<'_>) -> HandlerResult + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.registry.register_typed(name, handler);
        self
    }

    /// Register any [`Handler`] implementation.
    pub fn handler<H: Handler>(mut self, name: &str, handler: H) -> Self {
        self.registry.register(name, handler);
        self
    }

    /// Append a line to the text returned by `usage`.
    pub fn usage(mut self, text: &str) -> Self {
        self.registry.append_usage(text);
        self
    }

    /// Do not install `ping`, `kill` and the other built-in methods.
    pub fn without_admin_methods(mut self) -> Self {
        self.config.admin_methods = false;
        self
    }

    /// Hook consulted on every contained failure.
    pub fn on_error<H: ErrorHook>(mut self, hook: H) -> Self {
        self.error_hook = Some(Box::new(hook));
        self
    }

    /// Callback run once when the server stops.
    pub fn on_cleanup<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanup.push(Box::new(hook));
        self
    }

    pub fn build(self) -> Server {
        let mut server = Server::with_config(self.config, self.registry);
        server.policy = ErrorPolicy::new(self.error_hook);
        server.cleanup = self.cleanup;
        server
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// What woke the loop.
enum Wake {
    Event(Option<LoopEvent>),
    Accepted(Result<TransportStream>),
    Notified,
    Idle,
}

/// A request server.
///
/// Single-threaded by construction: exactly one handler runs at a time,
/// on the future driving [`serve`](Server::serve). Connection I/O runs on
/// separate tasks that only move bytes.
pub struct Server {
    config: ServerConfig,
    handle: ServerHandle,
    dispatcher: RequestDispatcher,
    policy: ErrorPolicy,
    cleanup: Vec<CleanupHook>,
    listener: Option<Listener>,
    events_tx: mpsc::Sender<LoopEvent>,
    events_rx: mpsc::Receiver<LoopEvent>,
    connections: HashMap<SourceId, Connection>,
    aux: HashMap<SourceId, AuxSource>,
    unstarted: Vec<(SourceId, BoxedReader)>,
    next_source: u64,
    stop_error: Option<ProcwireError>,
}

impl Server {
    /// Server on TCP `port` of the default host, with `methods` registered.
    pub fn new(port: u16, log_level: u8, methods: MethodRegistry) -> Self {
        let config = ServerConfig {
            endpoint: Endpoint::tcp(DEFAULT_HOST, port),
            log_level: Verbosity::new(log_level),
            ..ServerConfig::default()
        };
        Self::with_config(config, methods)
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn with_config(config: ServerConfig, methods: MethodRegistry) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            dispatcher: RequestDispatcher::new(methods, config.log_level),
            config,
            handle: ServerHandle::new(),
            policy: ErrorPolicy::new(None),
            cleanup: Vec::new(),
            listener: None,
            events_tx,
            events_rx,
            connections: HashMap::new(),
            aux: HashMap::new(),
            unstarted: Vec::new(),
            next_source: 1,
            stop_error: None,
        }
    }

    /// Handle for exiting, resolving deferred requests and closing sources.
    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ServerState {
        self.handle.state()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sorted names of the registered methods.
    pub fn method_names(&self) -> Vec<String> {
        self.dispatcher.registry().names()
    }

    /// Register a method. Only allowed before serving.
    pub fn register<H: Handler>(&mut self, name: &str, handler: H) -> Result<()> {
        self.ensure_created("register")?;
        self.dispatcher.registry_mut().register(name, handler);
        Ok(())
    }

    /// Register a closure method. Only allowed before serving.
    pub fn register_fn<F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&CallContext<'_>, Vec<Value>) -> HandlerResult + Send + Sync + 'static,
    {
        self.ensure_created("register")?;
        self.dispatcher.registry_mut().register_fn(name, handler);
        Ok(())
    }

    /// Add a callback run once when the server stops.
    pub fn on_cleanup<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanup.push(Box::new(hook));
    }

    /// Watch a line-oriented reader alongside the connections.
    ///
    /// `callback` runs on the loop for every line and is removed when it
    /// returns `false` or the reader ends.
    pub fn add_source<R, C>(&mut self, reader: R, callback: C) -> Result<SourceId>
    where
        R: AsyncRead + Send + Unpin + 'static,
        C: LineCallback,
    {
        self.ensure_created("add_source")?;
        let source = self.allocate_source();
        self.aux.insert(
            source,
            AuxSource {
                callback: Box::new(callback),
                task: None,
            },
        );
        self.unstarted.push((source, Box::new(reader)));
        Ok(source)
    }

    /// Bind the configured endpoint and report the bound address.
    ///
    /// Idempotent before serving. For TCP port 0 the chosen port is
    /// reported.
    pub async fn bind(&mut self) -> Result<Endpoint> {
        self.ensure_created("bind")?;
        self.bind_listener().await
    }

    /// Address of the bound listener, if any.
    pub fn local_endpoint(&self) -> Option<&Endpoint> {
        self.listener.as_ref().map(Listener::local_endpoint)
    }

    /// Run the loop until exit is requested.
    ///
    /// Binds first if needed. Returns `InvalidState` when called twice, a
    /// `Bind` error if the endpoint cannot be bound, or the failure an
    /// error hook chose to stop on.
    pub async fn serve(&mut self) -> Result<()> {
        self.handle
            .transition(ServerState::Created, ServerState::Running)
            .map_err(|state| {
                ProcwireError::InvalidState(format!("serve() called on a {} server", state))
            })?;

        if let Err(e) = self.bind_listener().await {
            self.handle.set_state(ServerState::Created);
            return Err(e);
        }

        if self.config.admin_methods {
            install_admin_methods(self.dispatcher.registry_mut());
        }
        if let Some(key) = self.config.quit_key {
            let source = self.allocate_source();
            self.aux.insert(
                source,
                AuxSource {
                    callback: Box::new(quit_on_key(key)),
                    task: None,
                },
            );
            match spawn_stdin_reader(source, self.events_tx.clone()) {
                Ok(()) => tracing::info!("Type a line starting with '{}' to stop", key),
                Err(e) => {
                    tracing::warn!("Cannot watch stdin for the quit key: {}", e);
                    self.aux.remove(&source);
                }
            }
        }
        self.start_aux_readers();

        if let Some(endpoint) = self.local_endpoint() {
            tracing::info!("Serving on {}", endpoint);
        }

        while !self.handle.exit_requested() {
            self.turn().await;
        }

        self.handle.set_state(ServerState::Exiting);
        self.shutdown().await;
        self.handle.set_state(ServerState::Stopped);

        match self.stop_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_created(&self, operation: &str) -> Result<()> {
        match self.handle.state() {
            ServerState::Created => Ok(()),
            state => Err(ProcwireError::InvalidState(format!(
                "{}() called on a {} server",
                operation, state
            ))),
        }
    }

    fn allocate_source(&mut self) -> SourceId {
        let source = SourceId::new(self.next_source);
        self.next_source += 1;
        source
    }

    async fn bind_listener(&mut self) -> Result<Endpoint> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_endpoint().clone());
        }
        let listener = Listener::bind(&self.config.endpoint).await?;
        let endpoint = listener.local_endpoint().clone();
        tracing::debug!("Bound {}", endpoint);
        self.listener = Some(listener);
        Ok(endpoint)
    }

    fn start_aux_readers(&mut self) {
        for (source, reader) in self.unstarted.drain(..) {
            if let Some(aux) = self.aux.get_mut(&source) {
                aux.task = Some(spawn_line_reader(source, reader, self.events_tx.clone()));
            }
        }
    }

    /// One iteration: wait, process a batch of events, then flush.
    async fn turn(&mut self) {
        let wake = tokio::select! {
            biased;
            event = self.events_rx.recv() => Wake::Event(event),
            accepted = accept_next(self.listener.as_ref()) => Wake::Accepted(accepted),
            _ = self.handle.woken() => Wake::Notified,
            _ = idle(self.config.poll_timeout) => Wake::Idle,
        };

        let mut batch = Vec::new();
        match wake {
            Wake::Event(Some(event)) => batch.push(event),
            Wake::Event(None) | Wake::Notified | Wake::Idle => {}
            Wake::Accepted(Ok(stream)) => self.open_connection(stream),
            Wake::Accepted(Err(e)) => tracing::warn!("Accept failed: {}", e),
        }

        while batch.len() < self.config.max_events_per_turn {
            match self.events_rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }

        // Requests queued behind an exit are never dispatched.
        for event in batch {
            if self.handle.exit_requested() {
                break;
            }
            self.process_event(event);
        }

        for source in self.handle.take_hangups() {
            tracing::debug!("Hanging up {}", source);
            self.close_source(source);
        }

        for ready in self.handle.store().drain_ready() {
            self.write_response(ready.source, ready.request_id, &ready.response);
        }
    }

    fn open_connection(&mut self, stream: TransportStream) {
        let source = self.allocate_source();
        let TransportStream {
            peer,
            reader,
            writer,
        } = stream;

        let (writer, writer_task) = spawn_writer_task(writer, self.config.writer.clone());
        let reader_task = spawn_connection_reader(
            source,
            reader,
            self.config.max_payload_size,
            self.events_tx.clone(),
        );

        tracing::info!("Accepted {} from {}", source, peer);
        self.connections.insert(
            source,
            Connection {
                peer,
                writer,
                reader_task,
                writer_task,
            },
        );
    }

    fn process_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Request {
                source,
                request_id,
                request,
            } => {
                if !self.connections.contains_key(&source) {
                    tracing::debug!("Ignoring request {} from closed {}", request_id, source);
                    return;
                }
                let Dispatched { outcome, failure } = self.dispatcher.dispatch(
                    &self.handle,
                    source,
                    request_id,
                    &request.method,
                    request.params,
                );
                if let Some(err) = failure {
                    self.on_failure(source, err);
                }
                if let Some(response) = outcome.into_response() {
                    self.write_response(source, request_id, &response);
                }
            }
            LoopEvent::Closed { source, error } => {
                if self.close_source(source) {
                    match error {
                        Some(err) => self.on_failure(source, err),
                        None => tracing::info!("{} disconnected", source),
                    }
                }
            }
            LoopEvent::Line { source, line } => self.process_line(source, &line),
            LoopEvent::AuxEnded { source, error } => {
                if self.close_source(source) {
                    match error {
                        Some(err) => self.on_failure(source, ProcwireError::Io(err)),
                        None => tracing::debug!("Source {} reached end of input", source),
                    }
                }
            }
        }
    }

    fn process_line(&mut self, source: SourceId, line: &str) {
        let handle = &self.handle;
        let Some(aux) = self.aux.get_mut(&source) else {
            return;
        };

        let keep = match panic::catch_unwind(AssertUnwindSafe(|| {
            aux.callback.on_line(handle, line)
        })) {
            Ok(keep) => keep,
            Err(_) => {
                tracing::error!("Line callback of {} panicked; removing it", source);
                false
            }
        };

        if !keep {
            self.close_source(source);
        }
    }

    /// Queue `response` on `source`. A closed source drops it; a transport
    /// failure closes the source.
    fn write_response(&mut self, source: SourceId, request_id: u32, response: &Response) {
        let Some(conn) = self.connections.get(&source) else {
            tracing::debug!("Dropping response {} for closed {}", request_id, source);
            return;
        };

        let frame = match response.encode(request_id) {
            Ok(frame) => frame,
            Err(e) => {
                self.on_failure(source, e);
                return;
            }
        };

        if let Err(e) = conn.writer.try_send(frame) {
            if matches!(e, ProcwireError::WriterFull) {
                tracing::warn!(
                    "{} has {} unwritten responses; closing it",
                    source,
                    conn.writer.pending_count()
                );
            }
            self.close_source(source);
            self.on_failure(source, e);
        }
    }

    /// Forget a connection or auxiliary source. Returns whether it existed.
    fn close_source(&mut self, source: SourceId) -> bool {
        if let Some(conn) = self.connections.remove(&source) {
            conn.reader_task.abort();
            // Dropping the last writer handle lets the task flush and shut down.
            drop(conn.writer);
            let forgotten = self.handle.store().forget_source(source);
            if forgotten > 0 {
                tracing::debug!("Dropped {} pending requests of {}", forgotten, source);
            }
            tracing::debug!("Closed {} ({})", source, conn.peer);
            return true;
        }
        if let Some(aux) = self.aux.remove(&source) {
            if let Some(task) = aux.task {
                task.abort();
            }
            self.unstarted.retain(|(id, _)| *id != source);
            return true;
        }
        false
    }

    fn on_failure(&mut self, source: SourceId, err: ProcwireError) {
        if !self.policy.handle(source, &err) {
            if self.stop_error.is_none() {
                self.stop_error = Some(err);
            }
            self.handle.exit();
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!("Shutting down");

        let mut writers = Vec::with_capacity(self.connections.len());
        for (source, conn) in self.connections.drain() {
            conn.reader_task.abort();
            drop(conn.writer);
            self.handle.store().forget_source(source);
            writers.push((source, conn.writer_task));
        }
        for (source, mut task) in writers {
            match tokio::time::timeout(FLUSH_TIMEOUT, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::debug!("Writer of {} failed: {}", source, e),
                Ok(Err(e)) => tracing::debug!("Writer of {} ended abnormally: {}", source, e),
                Err(_) => {
                    tracing::warn!("Writer of {} did not flush in time", source);
                    task.abort();
                }
            }
        }

        for (_, aux) in self.aux.drain() {
            if let Some(task) = aux.task {
                task.abort();
            }
        }
        self.unstarted.clear();
        self.listener = None;

        for hook in self.cleanup.drain(..) {
            hook();
        }
        tracing::info!("Server stopped");
    }
}

async fn accept_next(listener: Option<&Listener>) -> Result<TransportStream> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

fn spawn_connection_reader(
    source: SourceId,
    reader: BoxedReader,
    max_payload_size: u32,
    events: mpsc::Sender<LoopEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let error = read_requests(source, reader, max_payload_size, &events)
            .await
            .err();
        let _ = events.send(LoopEvent::Closed { source, error }).await;
    })
}

/// Read frames until EOF, forwarding each decoded request to the loop.
async fn read_requests(
    source: SourceId,
    mut reader: BoxedReader,
    max_payload_size: u32,
    events: &mpsc::Sender<LoopEvent>,
) -> Result<()> {
    let mut frame_buffer = FrameBuffer::with_max_payload(max_payload_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        for frame in frame_buffer.push(&buf[..n])? {
            let request = Request::decode(&frame)?;
            let event = LoopEvent::Request {
                source,
                request_id: frame.request_id(),
                request,
            };
            if events.send(event).await.is_err() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Outcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    fn ephemeral() -> ServerBuilder {
        ServerBuilder::new().host("127.0.0.1").port(0)
    }

    #[test]
    fn test_builder_configuration() {
        let server = ServerBuilder::new()
            .host("0.0.0.0")
            .port(5000)
            .log_level(12)
            .poll_timeout(Some(Duration::from_millis(50)))
            .quit_on('q')
            .max_pending_frames(16)
            .channel_capacity(8)
            .max_payload_size(1024)
            .without_admin_methods()
            .method("echo", |_ctx, p| Outcome::value(p))
            .build();

        let config = server.config();
        assert_eq!(config.endpoint, Endpoint::tcp("0.0.0.0", 5000));
        assert_eq!(config.log_level.level(), 9);
        assert_eq!(config.poll_timeout, Some(Duration::from_millis(50)));
        assert_eq!(config.quit_key, Some('q'));
        assert_eq!(config.writer.max_pending_frames, 16);
        assert_eq!(config.writer.channel_capacity, 8);
        assert_eq!(config.max_payload_size, 1024);
        assert!(!config.admin_methods);
        assert_eq!(server.method_names(), vec!["echo"]);
        assert_eq!(server.state(), ServerState::Created);
    }

    #[test]
    fn test_new_does_not_bind() {
        let server = Server::new(43434, 0, MethodRegistry::new());
        assert!(server.local_endpoint().is_none());
        assert_eq!(server.config().endpoint, Endpoint::tcp(DEFAULT_HOST, 43434));
    }

    #[tokio::test]
    async fn test_exit_before_serve_runs_cleanup_once() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = cleanups.clone();
        let mut server = ephemeral()
            .on_cleanup(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        let handle = server.handle();
        handle.exit();
        handle.exit();

        server.serve().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);

        let err = server.serve().await.unwrap_err();
        assert!(matches!(err, ProcwireError::InvalidState(_)));
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_register_after_serve_is_invalid_state() {
        let mut server = ephemeral().build();
        server.register_fn("before", |_ctx, _p| Outcome::value(1)).unwrap();

        server.handle().exit();
        server.serve().await.unwrap();

        let err = server
            .register_fn("after", |_ctx, _p| Outcome::value(2))
            .unwrap_err();
        assert!(matches!(err, ProcwireError::InvalidState(_)));
        assert!(server.method_names().contains(&"before".to_string()));
    }

    #[tokio::test]
    async fn test_bind_reports_port_and_is_idempotent() {
        let mut server = ephemeral().build();
        let first = server.bind().await.unwrap();
        let second = server.bind().await.unwrap();

        assert_ne!(first.port(), Some(0));
        assert_eq!(first, second);
        assert_eq!(server.local_endpoint(), Some(&first));
    }

    #[tokio::test]
    async fn test_bind_failure_keeps_created_state() {
        let mut holder = ephemeral().build();
        let taken = holder.bind().await.unwrap();

        let mut server = ServerBuilder::new().endpoint(taken).build();
        let err = server.serve().await.unwrap_err();

        assert!(matches!(err, ProcwireError::Bind { .. }));
        assert_eq!(server.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn test_admin_methods_installed_on_serve() {
        let mut server = ephemeral()
            .method("ping", |_ctx, _p| Outcome::value("mine"))
            .build();
        server.handle().exit();
        server.serve().await.unwrap();

        let names = server.method_names();
        assert!(names.contains(&"kill".to_string()));
        assert!(names.contains(&"getCommands".to_string()));
    }

    #[tokio::test]
    async fn test_aux_source_lines_reach_callback() {
        let (mut input, reader) = tokio::io::duplex(256);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let lines = seen.clone();

        let mut server = ephemeral().build();
        server
            .add_source(reader, move |server: &ServerHandle, line: &str| {
                lines.lock().unwrap().push(line.to_string());
                if line == "stop" {
                    server.exit();
                }
                true
            })
            .unwrap();

        input.write_all(b"one\ntwo\nstop\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), server.serve())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "stop"]);
    }

    #[tokio::test]
    async fn test_quit_key_source_stops_loop() {
        let (mut input, reader) = tokio::io::duplex(64);
        let mut server = ephemeral().build();
        server.add_source(reader, quit_on_key('q')).unwrap();

        input.write_all(b"hello\nq\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), server.serve())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_add_source_after_serve_is_invalid_state() {
        let mut server = ephemeral().build();
        server.handle().exit();
        server.serve().await.unwrap();

        let err = server.add_source(tokio::io::empty(), quit_on_key('q')).unwrap_err();
        assert!(matches!(err, ProcwireError::InvalidState(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_port_after_unix_endpoint_uses_default_host() {
        let server = ServerBuilder::new()
            .endpoint(Endpoint::unix("/tmp/procwire-unused.sock"))
            .port(7000)
            .build();
        assert_eq!(server.config().endpoint, Endpoint::tcp(DEFAULT_HOST, 7000));
    }

    #[tokio::test]
    async fn test_remove_source_while_serving() {
        let (mut input, reader) = tokio::io::duplex(64);
        let seen = Arc::new(AtomicUsize::new(0));
        let lines = seen.clone();

        let mut server = ephemeral().build();
        let source = server
            .add_source(reader, move |_: &ServerHandle, _: &str| {
                lines.fetch_add(1, Ordering::SeqCst);
                true
            })
            .unwrap();
        let handle = server.handle();
        let task = tokio::spawn(async move { server.serve().await });

        input.write_all(b"one\n").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        handle.remove_source(source);

        // The reader is dropped once the source is gone.
        tokio::time::timeout(Duration::from_secs(5), async {
            while input.write_all(b"more\n").await.is_ok() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handle.state(), ServerState::Running);

        handle.exit();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_quit_key_reader_does_not_hold_runtime() {
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let mut server = ephemeral().quit_on('q').build();
            server.handle().exit();
            runtime.block_on(server.serve()).unwrap();
            // Waits for any blocking task still reading stdin.
            drop(runtime);
            let _ = done_tx.send(());
        });

        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
