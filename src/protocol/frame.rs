//! Frame structs for inbound and outbound traffic.
//!
//! [`Frame`] is a parsed inbound frame; [`OutboundFrame`] carries a
//! pre-encoded header and payload to the writer task.
//! Both use `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use procwire_server::protocol::{Frame, Header, flags};
//! use bytes::Bytes;
//!
//! let header = Header::new(flags::RESPONSE, 42, 5);
//! let frame = Frame::new(header, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.request_id(), 42);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the request ID.
    #[inline]
    pub fn request_id(&self) -> u32 {
        self.header.request_id
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    /// Check if this is a fault response.
    #[inline]
    pub fn is_fault(&self) -> bool {
        self.header.is_fault()
    }
}

/// A frame ready to be written to a connection.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (9 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame.
    ///
    /// The header's payload length is taken from `payload`.
    #[inline]
    pub fn new(flags: u8, request_id: u32, payload: Bytes) -> Self {
        let header = Header::new(flags, request_id, payload.len() as u32);
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Flatten into a contiguous byte vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&self.header);
        buf.extend_from_slice(&self.payload);
        buf
    }
}
