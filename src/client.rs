//! Minimal async client.
//!
//! Requests can be pipelined: [`Client::send`] returns the request id and
//! [`Client::recv`] yields responses as they arrive. [`Client::call`] does
//! both for one request.
//!
//! # Example
//!
//! ```no_run
//! use procwire_server::Client;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> procwire_server::Result<()> {
//!     let mut client = Client::connect("127.0.0.1:43434").await?;
//!     let reply = client.call_value("echo", vec![json!("hello")]).await?;
//!     assert_eq!(reply, json!(["hello"]));
//!     client.close().await
//! }
//! ```

use std::collections::VecDeque;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;

use crate::error::{ProcwireError, Result};
use crate::protocol::{Frame, FrameBuffer, Request, Response};
use crate::transport::{BoxedReader, BoxedWriter};
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// A connection to a server.
pub struct Client {
    reader: BoxedReader,
    writer: WriterHandle,
    writer_task: JoinHandle<Result<()>>,
    frame_buffer: FrameBuffer,
    received: VecDeque<Frame>,
    read_buf: Vec<u8>,
    next_request_id: u32,
}

impl Client {
    /// Connect over TCP.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_halves(Box::new(reader), Box::new(writer)))
    }

    /// Connect over a Unix domain socket.
    #[cfg(unix)]
    pub async fn connect_unix(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_halves(Box::new(reader), Box::new(writer)))
    }

    fn from_halves(reader: BoxedReader, writer: BoxedWriter) -> Self {
        let (writer, writer_task) = spawn_writer_task(writer, WriterConfig::default());
        Self {
            reader,
            writer,
            writer_task,
            frame_buffer: FrameBuffer::new(),
            received: VecDeque::new(),
            read_buf: vec![0u8; 64 * 1024],
            next_request_id: 1,
        }
    }

    /// Send a request without waiting for its response.
    ///
    /// Returns the request id the response will carry.
    pub async fn send(&mut self, method: &str, params: Vec<Value>) -> Result<u32> {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        let frame = Request::new(method, params).encode(request_id)?;
        self.writer.send(frame).await?;
        Ok(request_id)
    }

    /// Wait for the next response.
    ///
    /// Fails with `ConnectionClosed` when the server closes the connection.
    pub async fn recv(&mut self) -> Result<(u32, Response)> {
        loop {
            if let Some(frame) = self.received.pop_front() {
                let response = Response::decode(&frame)?;
                return Ok((frame.request_id(), response));
            }

            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ProcwireError::ConnectionClosed);
            }
            self.received
                .extend(self.frame_buffer.push(&self.read_buf[..n])?);
        }
    }

    /// Send one request and wait for its response.
    ///
    /// Must not be mixed with outstanding pipelined requests.
    pub async fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Response> {
        let request_id = self.send(method, params).await?;
        let (answered, response) = self.recv().await?;
        if answered != request_id {
            return Err(ProcwireError::Protocol(format!(
                "expected response {}, got {}",
                request_id, answered
            )));
        }
        Ok(response)
    }

    /// Like [`call`](Self::call), with a fault mapped to `ProcwireError::Fault`.
    pub async fn call_value(&mut self, method: &str, params: Vec<Value>) -> Result<Value> {
        Ok(self.call(method, params).await?.into_result()?)
    }

    /// Flush queued requests and close the write side.
    pub async fn close(self) -> Result<()> {
        drop(self.writer);
        match self.writer_task.await {
            Ok(result) => result,
            Err(e) => Err(ProcwireError::Protocol(format!("writer task failed: {}", e))),
        }
    }
}
