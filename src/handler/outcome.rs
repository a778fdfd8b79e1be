//! What a handler produces.

use serde::Serialize;
use serde_json::Value;

use crate::protocol::{Fault, Response};

/// Error type handlers may return.
///
/// A boxed [`Fault`] is forwarded to the caller verbatim; any other error
/// is logged and answered with a generic internal-error fault.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for handler functions.
pub type HandlerResult = Result<Outcome, HandlerError>;

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Answer now with this value.
    Immediate(Value),
    /// Answer now with a fault.
    Fault(Fault),
    /// Answer later through the pending store.
    Deferred,
}

impl Outcome {
    /// Immediate answer from anything convertible to a JSON value.
    pub fn value(value: impl Into<Value>) -> HandlerResult {
        Ok(Outcome::Immediate(value.into()))
    }

    /// Immediate answer from any serializable type.
    pub fn serialize<T: Serialize>(value: &T) -> HandlerResult {
        Ok(Outcome::Immediate(serde_json::to_value(value)?))
    }

    /// Fault answer.
    pub fn fault(code: i32, message: impl Into<String>) -> HandlerResult {
        Ok(Outcome::Fault(Fault::new(code, message)))
    }

    /// Postpone the answer.
    pub fn deferred() -> HandlerResult {
        Ok(Outcome::Deferred)
    }

    /// Response to write now, `None` for a deferral.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Outcome::Immediate(value) => Some(Response::Success(value)),
            Outcome::Fault(fault) => Some(Response::Fault(fault)),
            Outcome::Deferred => None,
        }
    }
}

impl From<Fault> for Outcome {
    fn from(fault: Fault) -> Self {
        Outcome::Fault(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors() {
        assert_eq!(Outcome::value("pong").unwrap(), Outcome::Immediate(json!("pong")));
        assert_eq!(
            Outcome::fault(23, "blah").unwrap(),
            Outcome::Fault(Fault::new(23, "blah"))
        );
        assert_eq!(Outcome::deferred().unwrap(), Outcome::Deferred);
    }

    #[test]
    fn test_serialize_struct() {
        #[derive(Serialize)]
        struct Point {
            x: i32,
            y: i32,
        }
        let outcome = Outcome::serialize(&Point { x: 1, y: 2 }).unwrap();
        assert_eq!(outcome, Outcome::Immediate(json!({"x": 1, "y": 2})));
    }

    #[test]
    fn test_into_response() {
        assert_eq!(
            Outcome::Immediate(json!(1)).into_response(),
            Some(Response::Success(json!(1)))
        );
        assert!(Outcome::Deferred.into_response().is_none());
    }
}
