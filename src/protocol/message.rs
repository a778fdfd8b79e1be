//! Request and response payloads.
//!
//! A request frame carries a MsgPack map `{method, params}`. A success
//! response carries the bare result value; a fault response carries
//! `{code, message}` and sets the fault flag in the header.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::frame::{Frame, OutboundFrame};
use super::wire_format::flags;
use crate::codec::MsgPackCodec;
use crate::error::{ProcwireError, Result};

/// Method name is not registered.
pub const UNKNOWN_METHOD: i32 = -32601;
/// Arguments could not be decoded into the handler's parameter type.
pub const INVALID_PARAMS: i32 = -32602;
/// Handler failed unexpectedly; details stay in the server log.
pub const INTERNAL_ERROR: i32 = -32603;

/// Structured application error: integer code plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("fault {code}: {message}")]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl Fault {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown_method(name: &str) -> Self {
        Self::new(UNKNOWN_METHOD, format!("unknown command: '{}'", name))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal() -> Self {
        Self::new(INTERNAL_ERROR, "internal server error")
    }
}

/// An inbound method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Build the request frame for `request_id`.
    pub fn encode(&self, request_id: u32) -> Result<OutboundFrame> {
        let payload = MsgPackCodec::encode(self)?;
        Ok(OutboundFrame::new(
            flags::REQUEST,
            request_id,
            Bytes::from(payload),
        ))
    }

    /// Parse a request frame.
    pub fn decode(frame: &Frame) -> Result<Self> {
        if frame.is_response() {
            return Err(ProcwireError::Protocol(format!(
                "expected request, got response frame for id {}",
                frame.request_id()
            )));
        }
        MsgPackCodec::decode(frame.payload())
    }
}

/// Response value: a success payload or a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(Value),
    Fault(Fault),
}

impl Response {
    /// Build the response frame answering `request_id`.
    pub fn encode(&self, request_id: u32) -> Result<OutboundFrame> {
        let (flags, payload) = match self {
            Response::Success(value) => (flags::RESPONSE, MsgPackCodec::encode(value)?),
            Response::Fault(fault) => (flags::FAULT_RESPONSE, MsgPackCodec::encode(fault)?),
        };
        Ok(OutboundFrame::new(flags, request_id, Bytes::from(payload)))
    }

    /// Parse a response frame.
    pub fn decode(frame: &Frame) -> Result<Self> {
        if !frame.is_response() {
            return Err(ProcwireError::Protocol(format!(
                "expected response, got request frame for id {}",
                frame.request_id()
            )));
        }
        if frame.is_fault() {
            Ok(Response::Fault(MsgPackCodec::decode(frame.payload())?))
        } else {
            Ok(Response::Success(MsgPackCodec::decode(frame.payload())?))
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Response::Fault(_))
    }

    /// Convert into a `Result`, turning a fault into an error.
    pub fn into_result(self) -> std::result::Result<Value, Fault> {
        match self {
            Response::Success(value) => Ok(value),
            Response::Fault(fault) => Err(fault),
        }
    }
}

impl From<Fault> for Response {
    fn from(fault: Fault) -> Self {
        Response::Fault(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;
    use serde_json::json;

    fn reparse(frame: OutboundFrame) -> Frame {
        let mut buffer = FrameBuffer::new();
        let mut frames = buffer.push(&frame.to_vec()).unwrap();
        assert_eq!(frames.len(), 1);
        frames.remove(0)
    }

    #[test]
    fn test_request_through_frame() {
        let request = Request::new("echo", vec![json!("hello"), json!(3)]);
        let frame = reparse(request.encode(11).unwrap());

        assert_eq!(frame.request_id(), 11);
        assert!(!frame.is_response());
        assert_eq!(Request::decode(&frame).unwrap(), request);
    }

    #[test]
    fn test_request_params_default_to_empty() {
        #[derive(Serialize)]
        struct Bare {
            method: &'static str,
        }
        let payload = MsgPackCodec::encode(&Bare { method: "ping" }).unwrap();
        let frame = reparse(OutboundFrame::new(flags::REQUEST, 1, Bytes::from(payload)));

        let request = Request::decode(&frame).unwrap();
        assert_eq!(request.method, "ping");
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_fault_response_sets_flag() {
        let response = Response::Fault(Fault::new(23, "blah"));
        let frame = reparse(response.encode(5).unwrap());

        assert!(frame.is_fault());
        assert_eq!(Response::decode(&frame).unwrap(), response);
    }

    #[test]
    fn test_success_response_nested_value() {
        let response = Response::Success(json!({"items": ["a", "b"], "n": 2}));
        let frame = reparse(response.encode(9).unwrap());

        assert!(!frame.is_fault());
        assert_eq!(Response::decode(&frame).unwrap(), response);
    }

    #[test]
    fn test_direction_mismatch_is_protocol_error() {
        let frame = reparse(Response::Success(json!(1)).encode(1).unwrap());
        assert!(matches!(
            Request::decode(&frame),
            Err(ProcwireError::Protocol(_))
        ));

        let frame = reparse(Request::new("ping", vec![]).encode(1).unwrap());
        assert!(matches!(
            Response::decode(&frame),
            Err(ProcwireError::Protocol(_))
        ));
    }

    #[test]
    fn test_unknown_method_fault_text() {
        let fault = Fault::unknown_method("frobnicate");
        assert_eq!(fault.code, UNKNOWN_METHOD);
        assert_eq!(fault.message, "unknown command: 'frobnicate'");
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Response::Success(json!(1)).into_result(), Ok(json!(1)));
        assert_eq!(
            Response::Fault(Fault::new(1, "x")).into_result(),
            Err(Fault::new(1, "x"))
        );
    }
}
