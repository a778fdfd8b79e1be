//! Reassembly of frames from partial socket reads.
//!
//! Bytes accumulate in a `BytesMut`; complete frames are split off without
//! copying. Once a header has been read and validated it is kept aside
//! until its payload is complete.

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

/// Initial buffer capacity.
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Accumulates inbound bytes and yields complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    /// Header whose payload has not fully arrived yet.
    header: Option<Header>,
    max_payload_size: u32,
}

impl FrameBuffer {
    /// Buffer accepting payloads up to 16 MiB.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            header: None,
            max_payload_size,
        }
    }

    /// Append `data` and return every frame it completes, in order.
    ///
    /// # Errors
    ///
    /// Fails when a header does not validate (oversized payload, reserved
    /// flag bits, fault flag on a request). The stream cannot be resynced
    /// after that; the connection should be dropped.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let header = match self.header.take() {
            Some(header) => header,
            None => {
                let Some(header) = Header::decode(&self.buffer) else {
                    return Ok(None);
                };
                header.validate(self.max_payload_size)?;
                let _ = self.buffer.split_to(HEADER_SIZE);
                header
            }
        };

        let length = header.payload_length as usize;
        if self.buffer.len() < length {
            self.header = Some(header);
            return Ok(None);
        }

        let payload = self.buffer.split_to(length).freeze();
        Ok(Some(Frame::new(header, payload)))
    }

    /// Bytes buffered but not yet returned as part of a frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing is buffered, including no half-read frame.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.header.is_none()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.header = None;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
