//! Protocol module - wire format, framing, and messages.
//!
//! This module implements the binary protocol spoken by server and client:
//! - 9-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Request/response payloads and fault codes

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{Frame, OutboundFrame};
pub use frame_buffer::FrameBuffer;
pub use message::{Fault, Request, Response, INTERNAL_ERROR, INVALID_PARAMS, UNKNOWN_METHOD};
pub use wire_format::{flags, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
