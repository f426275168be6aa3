//! Request/response envelopes layered on the wire codec.
//!
//! An envelope reuses the [`Value`] list shape, so the one codec serves both
//! layers: a request is `List[method, arguments]`, a success response is a
//! one-element list holding the return value, an error response is the
//! three-element list `[code, message, details]`, and a zero-length payload
//! is the distinguished "unimplemented" response.

use std::fmt;

use crate::codec::{self, DecodeError};
use crate::value::Value;

/// Reserved error code for faults raised inside the dispatch machinery
/// (handler panics, dropped responders, transport send failures).
pub const INTERNAL_ERROR_CODE: &str = "internal-error";

/// Reserved error code answering a request the host could not decode.
pub const DECODE_ERROR_CODE: &str = "decode-error";

/// One method invocation, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        MethodCall { method: method.into(), arguments }
    }
}

/// Application-level failure carried verbatim across the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CallError {
    pub code: String,
    pub message: String,
    /// Extra diagnostic payload; `Value::Null` when absent.
    pub details: Value,
}

impl CallError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        CallError { code: code.into(), message: message.into(), details: Value::Null }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CallError::new(INTERNAL_ERROR_CODE, message)
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CallError {}

/// Outcome of one call as the caller observes it.
///
/// `Cancelled` is local-only: it is produced when the owning component tears
/// down while the call is outstanding, and never appears in a wire envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    Success(Value),
    Error(CallError),
    /// No handler was registered for the method name. Distinct from an
    /// application error; carries no payload.
    Unimplemented,
    Cancelled,
}

/// Malformed envelope, distinct from a byte-level codec failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    Codec(DecodeError),
    /// Request payload was not `List[String, arguments]`.
    BadRequestShape,
    /// Response payload was not one of the three valid shapes.
    BadResponseShape,
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::Codec(e) => write!(f, "codec error: {}", e),
            EnvelopeError::BadRequestShape => write!(f, "malformed request envelope"),
            EnvelopeError::BadResponseShape => write!(f, "malformed response envelope"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl From<DecodeError> for EnvelopeError {
    fn from(e: DecodeError) -> Self {
        EnvelopeError::Codec(e)
    }
}

pub fn encode_request(call: MethodCall) -> Vec<u8> {
    codec::encode(&Value::List(vec![Value::String(call.method), call.arguments]))
}

pub fn decode_request(payload: &[u8]) -> Result<MethodCall, EnvelopeError> {
    let value = codec::decode(payload)?;
    let Value::List(mut items) = value else {
        return Err(EnvelopeError::BadRequestShape);
    };
    if items.len() != 2 {
        return Err(EnvelopeError::BadRequestShape);
    }
    let arguments = items.pop().unwrap_or(Value::Null);
    let Some(Value::String(method)) = items.pop() else {
        return Err(EnvelopeError::BadRequestShape);
    };
    Ok(MethodCall { method, arguments })
}

pub fn encode_success(result: Value) -> Vec<u8> {
    codec::encode(&Value::List(vec![result]))
}

pub fn encode_error(error: &CallError) -> Vec<u8> {
    codec::encode(&Value::List(vec![
        Value::String(error.code.clone()),
        Value::String(error.message.clone()),
        error.details.clone(),
    ]))
}

/// The "unimplemented" response is the absence of a payload.
pub fn encode_unimplemented() -> Vec<u8> {
    Vec::new()
}

pub fn decode_response(payload: &[u8]) -> Result<MethodResult, EnvelopeError> {
    if payload.is_empty() {
        return Ok(MethodResult::Unimplemented);
    }
    let value = codec::decode(payload)?;
    let Value::List(mut items) = value else {
        return Err(EnvelopeError::BadResponseShape);
    };
    match items.len() {
        1 => Ok(MethodResult::Success(items.pop().unwrap_or(Value::Null))),
        3 => {
            let details = items.pop().unwrap_or(Value::Null);
            let message = items.pop();
            let code = items.pop();
            match (code, message) {
                (Some(Value::String(code)), Some(Value::String(message))) => {
                    Ok(MethodResult::Error(CallError { code, message, details }))
                }
                _ => Err(EnvelopeError::BadResponseShape),
            }
        }
        _ => Err(EnvelopeError::BadResponseShape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let call = MethodCall::new("echoInt", Value::List(vec![Value::Int64(5)]));
        let decoded = decode_request(&encode_request(call.clone())).unwrap();
        assert_eq!(decoded, call);
    }

    #[test]
    fn request_with_non_string_method_is_rejected() {
        let payload = codec::encode(&Value::List(vec![Value::Int64(1), Value::Null]));
        assert_eq!(decode_request(&payload), Err(EnvelopeError::BadRequestShape));
    }

    #[test]
    fn request_with_wrong_arity_is_rejected() {
        let payload = codec::encode(&Value::List(vec![Value::from("m")]));
        assert_eq!(decode_request(&payload), Err(EnvelopeError::BadRequestShape));
    }

    #[test]
    fn success_response_round_trip() {
        let decoded = decode_response(&encode_success(Value::Null)).unwrap();
        assert_eq!(decoded, MethodResult::Success(Value::Null));
    }

    #[test]
    fn error_response_round_trip() {
        let error = CallError::new("bad-state", "not ready").with_details(Value::from("details"));
        let decoded = decode_response(&encode_error(&error)).unwrap();
        assert_eq!(decoded, MethodResult::Error(error));
    }

    #[test]
    fn empty_payload_is_unimplemented() {
        assert_eq!(decode_response(&encode_unimplemented()), Ok(MethodResult::Unimplemented));
    }

    #[test]
    fn two_element_response_is_rejected() {
        let payload = codec::encode(&Value::List(vec![Value::Null, Value::Null]));
        assert_eq!(decode_response(&payload), Err(EnvelopeError::BadResponseShape));
    }

    #[test]
    fn truncated_response_surfaces_codec_error() {
        let mut payload = encode_success(Value::from("hello"));
        payload.truncate(payload.len() - 2);
        assert_eq!(
            decode_response(&payload),
            Err(EnvelopeError::Codec(DecodeError::TruncatedInput))
        );
    }
}
