//! Payload serialization.
//!
//! Frame payloads are MessagePack with named struct fields, so requests
//! and faults travel as maps.
//!
//! ```
//! use procwire_server::codec::MsgPackCodec;
//! use serde_json::json;
//!
//! let bytes = MsgPackCodec::encode(&json!({"method": "ping", "params": []})).unwrap();
//! let value: serde_json::Value = MsgPackCodec::decode(&bytes).unwrap();
//! assert_eq!(value["method"], "ping");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
