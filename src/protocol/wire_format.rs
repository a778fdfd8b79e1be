//! Frame header layout.
//!
//! Every frame starts with a fixed 9-byte header, integers big endian:
//! ```text
//! ┌───────┬────────────┬────────────┐
//! │ flags │ request id │ length     │
//! │ u8    │ u32        │ u32        │
//! └───────┴────────────┴────────────┘
//! ```
//!
//! The request id is chosen by the client and echoed in the response.

use bytes::{Buf, BufMut};

use crate::error::{ProcwireError, Result};

/// Header size in bytes.
pub const HEADER_SIZE: usize = 9;

/// Default payload limit (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Flag bits.
pub mod flags {
    /// Set on responses, clear on requests.
    pub const IS_RESPONSE: u8 = 0b0000_0001;
    /// Set on fault responses. Invalid without `IS_RESPONSE`.
    pub const IS_FAULT: u8 = 0b0000_0010;
    /// Bits that must be zero.
    pub const RESERVED_MASK: u8 = !(IS_RESPONSE | IS_FAULT);

    pub const REQUEST: u8 = 0;
    pub const RESPONSE: u8 = IS_RESPONSE;
    pub const FAULT_RESPONSE: u8 = IS_RESPONSE | IS_FAULT;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: u8,
    pub request_id: u32,
    pub payload_length: u32,
}

impl Header {
    pub fn new(flags: u8, request_id: u32, payload_length: u32) -> Self {
        Self {
            flags,
            request_id,
            payload_length,
        }
    }

    /// Serialize to the 9 wire bytes.
    ///
    /// ```
    /// use procwire_server::protocol::{flags, Header};
    ///
    /// let bytes = Header::new(flags::RESPONSE, 42, 100).encode();
    /// assert_eq!(bytes, [0x01, 0, 0, 0, 42, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let mut out = &mut bytes[..];
        out.put_u8(self.flags);
        out.put_u32(self.request_id);
        out.put_u32(self.payload_length);
        bytes
    }

    /// Parse the first 9 bytes of `buf`; `None` if fewer are available.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let mut input = &buf[..HEADER_SIZE];
        Some(Self {
            flags: input.get_u8(),
            request_id: input.get_u32(),
            payload_length: input.get_u32(),
        })
    }

    /// Reject oversized payloads, reserved bits, and faults on requests.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(ProcwireError::Protocol(format!(
                "payload of {} bytes exceeds limit of {}",
                self.payload_length, max_payload_size
            )));
        }
        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(ProcwireError::Protocol(format!(
                "reserved flag bits set: {:#04x}",
                self.flags
            )));
        }
        if self.is_fault() && !self.is_response() {
            return Err(ProcwireError::Protocol(format!(
                "fault flag on request {}",
                self.request_id
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.flags & flags::IS_RESPONSE != 0
    }

    #[inline]
    pub fn is_fault(&self) -> bool {
        self.flags & flags::IS_FAULT != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_layout() {
        let bytes = Header::new(flags::FAULT_RESPONSE, 0x0405_0607, 0x0809_0A0B).encode();
        assert_eq!(bytes, [0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B]);
        assert_eq!(
            Header::decode(&bytes),
            Some(Header::new(0x03, 0x0405_0607, 0x0809_0A0B))
        );
    }

    #[test]
    fn test_decode_needs_nine_bytes() {
        assert!(Header::decode(&[0u8; 8]).is_none());
        // Trailing payload bytes are ignored.
        let mut bytes = Header::new(flags::REQUEST, 7, 2).encode().to_vec();
        bytes.extend_from_slice(b"xy");
        assert_eq!(Header::decode(&bytes).map(|h| h.request_id), Some(7));
    }

    #[test]
    fn test_validate_payload_limit() {
        let header = Header::new(flags::REQUEST, 1, 101);
        assert!(header.validate(100).is_err());
        assert!(header.validate(101).is_ok());
    }

    #[test]
    fn test_validate_reserved_bits() {
        for bit in 2..8 {
            let header = Header::new(1 << bit, 1, 0);
            assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err(), "bit {}", bit);
        }
    }

    #[test]
    fn test_validate_fault_requires_response() {
        let header = Header::new(flags::IS_FAULT, 1, 0);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_err());

        let header = Header::new(flags::FAULT_RESPONSE, 1, 0);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
    }

    #[test]
    fn test_flag_predicates() {
        let fault = Header::new(flags::FAULT_RESPONSE, 0, 0);
        assert!(fault.is_response() && fault.is_fault());

        let success = Header::new(flags::RESPONSE, 0, 0);
        assert!(success.is_response() && !success.is_fault());

        let request = Header::new(flags::REQUEST, 0, 0);
        assert!(!request.is_response() && !request.is_fault());
    }
}
