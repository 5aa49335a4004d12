//! Envelope codec
//!
//! Every frame on a transport is a CBOR map in one of two shapes:
//!
//! - call: `{id, method, params}`
//! - reply: `{id, result}` or `{id, error, code, detail?}`
//!
//! Anything else decodes as [`Decoded::Malformed`] and is dropped by the
//! receiver.

use std::fmt;
use std::str::FromStr;

use ciborium::Value;

use crate::error::{codes, RpcError};
use crate::schema::Method;
use crate::transport::Frame;

/// One in-flight request
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    pub id: String,
    pub method: Method,
    pub params: Vec<Value>,
}

/// Response to exactly one call
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    pub id: String,
    pub outcome: Result<Value, ReplyError>,
}

/// Error kinds that travel in reply envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Validation,
    UnhandledMethod,
    HandlerFailure,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Validation => codes::VALIDATION_ERROR,
            ErrorCode::UnhandledMethod => codes::UNHANDLED_METHOD,
            ErrorCode::HandlerFailure => codes::HANDLER_FAILURE,
        }
    }
}

impl FromStr for ErrorCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            codes::VALIDATION_ERROR => Ok(ErrorCode::Validation),
            codes::UNHANDLED_METHOD => Ok(ErrorCode::UnhandledMethod),
            codes::HANDLER_FAILURE => Ok(ErrorCode::HandlerFailure),
            _ => Err(()),
        }
    }
}

/// Error payload of a reply envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyError {
    pub code: ErrorCode,
    /// Human-readable summary
    pub message: String,
    /// Domain error code from the handler, if any
    pub detail: Option<String>,
}

impl ReplyError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Validation,
            message: message.into(),
            detail: None,
        }
    }

    pub fn unhandled(method: Method) -> Self {
        Self {
            code: ErrorCode::UnhandledMethod,
            message: format!("no handler registered for {}", method),
            detail: None,
        }
    }

    pub fn handler_failure(detail: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::HandlerFailure,
            message: message.into(),
            detail,
        }
    }

    /// Convert into the caller-facing error for a call to `method`
    pub fn into_rpc_error(self, method: Method) -> RpcError {
        match self.code {
            ErrorCode::Validation => RpcError::Validation(self.message),
            ErrorCode::UnhandledMethod => RpcError::UnhandledMethod(method.to_string()),
            ErrorCode::HandlerFailure => RpcError::HandlerFailure {
                detail: self.detail,
                message: self.message,
            },
        }
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Call(CallEnvelope),
    Reply(ReplyEnvelope),
    /// Not a valid envelope; the reason is for logging only
    Malformed(String),
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn to_frame(value: &Value) -> Result<Frame, RpcError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| RpcError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Encode a call envelope
pub fn encode_call(id: &str, method: Method, params: Vec<Value>) -> Result<Frame, RpcError> {
    to_frame(&Value::Map(vec![
        (text("id"), text(id)),
        (text("method"), text(method.as_str())),
        (text("params"), Value::Array(params)),
    ]))
}

/// Encode a reply envelope
pub fn encode_reply(id: &str, outcome: Result<Value, ReplyError>) -> Result<Frame, RpcError> {
    let mut entries = vec![(text("id"), text(id))];
    match outcome {
        Ok(result) => entries.push((text("result"), result)),
        Err(err) => {
            entries.push((text("error"), Value::Text(err.message)));
            entries.push((text("code"), text(err.code.as_str())));
            if let Some(detail) = err.detail {
                entries.push((text("detail"), Value::Text(detail)));
            }
        }
    }
    to_frame(&Value::Map(entries))
}

impl CallEnvelope {
    pub fn encode(&self) -> Result<Frame, RpcError> {
        encode_call(&self.id, self.method, self.params.clone())
    }
}

impl ReplyEnvelope {
    pub fn encode(&self) -> Result<Frame, RpcError> {
        encode_reply(&self.id, self.outcome.clone())
    }
}

/// Classify a frame; never fails
pub fn decode(frame: &[u8]) -> Decoded {
    let value: Value = match ciborium::de::from_reader(frame) {
        Ok(value) => value,
        Err(e) => return Decoded::Malformed(format!("undecodable frame: {}", e)),
    };

    let mut entries = match value {
        Value::Map(entries) => entries,
        _ => return Decoded::Malformed("envelope is not a map".to_string()),
    };

    let id = match take(&mut entries, "id") {
        Some(Value::Text(id)) => id,
        Some(_) => return Decoded::Malformed("correlation id is not a string".to_string()),
        None => return Decoded::Malformed("missing correlation id".to_string()),
    };

    if let Some(method) = take(&mut entries, "method") {
        let method = match method {
            Value::Text(name) => match Method::from_name(&name) {
                Some(method) => method,
                None => return Decoded::Malformed(format!("unknown method {}", name)),
            },
            _ => return Decoded::Malformed("method is not a string".to_string()),
        };
        let params = match take(&mut entries, "params") {
            Some(Value::Array(params)) => params,
            None => Vec::new(),
            Some(_) => return Decoded::Malformed("params is not an array".to_string()),
        };
        return Decoded::Call(CallEnvelope { id, method, params });
    }

    if let Some(result) = take(&mut entries, "result") {
        return Decoded::Reply(ReplyEnvelope { id, outcome: Ok(result) });
    }

    if let Some(error) = take(&mut entries, "error") {
        let message = match error {
            Value::Text(message) => message,
            _ => return Decoded::Malformed("error is not a string".to_string()),
        };
        // Missing or unrecognized codes are treated as handler failures
        let code = match take(&mut entries, "code") {
            Some(Value::Text(code)) => code.parse().unwrap_or(ErrorCode::HandlerFailure),
            _ => ErrorCode::HandlerFailure,
        };
        let detail = match take(&mut entries, "detail") {
            Some(Value::Text(detail)) => Some(detail),
            _ => None,
        };
        return Decoded::Reply(ReplyEnvelope {
            id,
            outcome: Err(ReplyError { code, message, detail }),
        });
    }

    Decoded::Malformed("envelope is neither a call nor a reply".to_string())
}

fn take(entries: &mut Vec<(Value, Value)>, key: &str) -> Option<Value> {
    let index = entries.iter().position(|(k, _)| k.as_text() == Some(key))?;
    Some(entries.swap_remove(index).1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(value: Value) -> Frame {
        to_frame(&value).unwrap()
    }

    #[test]
    fn test_call_roundtrip_preserves_nested_values() {
        let post = Value::Map(vec![
            (text("magnet"), text("magnet:?xt=urn:btih:p1")),
            (text("tags"), Value::Array(vec![text("b"), text("a")])),
            (
                text("author"),
                Value::Map(vec![(text("name"), text("A")), (text("pubkey"), text("a"))]),
            ),
            (text("size"), Value::Integer(u64::MAX.into())),
            (text("thumb"), Value::Bytes(vec![0, 255, 7])),
        ]);
        let call = CallEnvelope {
            id: "c1".to_string(),
            method: Method::PublishPost,
            params: vec![post],
        };

        assert_eq!(decode(&call.encode().unwrap()), Decoded::Call(call));
    }

    #[test]
    fn test_reply_roundtrip() {
        let ok = ReplyEnvelope {
            id: "r1".to_string(),
            outcome: Ok(Value::Null),
        };
        assert_eq!(decode(&ok.encode().unwrap()), Decoded::Reply(ok));

        let failed = ReplyEnvelope {
            id: "r2".to_string(),
            outcome: Err(ReplyError::handler_failure(
                Some("insufficient_funds".to_string()),
                "insufficient funds: need 5 sats, have 0",
            )),
        };
        assert_eq!(decode(&failed.encode().unwrap()), Decoded::Reply(failed));
    }

    #[test]
    fn test_missing_id_is_malformed() {
        let frame = frame_of(Value::Map(vec![(text("result"), Value::Bool(true))]));
        assert!(matches!(decode(&frame), Decoded::Malformed(_)));
    }

    #[test]
    fn test_unknown_method_is_malformed() {
        let frame = frame_of(Value::Map(vec![
            (text("id"), text("x")),
            (text("method"), text("formatDisk")),
            (text("params"), Value::Array(vec![])),
        ]));
        assert!(matches!(decode(&frame), Decoded::Malformed(reason) if reason.contains("formatDisk")));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(decode(b"\xff\x00garbage"), Decoded::Malformed(_)));
        assert!(matches!(decode(&frame_of(text("hello"))), Decoded::Malformed(_)));
        let neither = frame_of(Value::Map(vec![(text("id"), text("x"))]));
        assert!(matches!(decode(&neither), Decoded::Malformed(_)));
    }

    #[test]
    fn test_error_without_code_is_handler_failure() {
        let frame = frame_of(Value::Map(vec![
            (text("id"), text("x")),
            (text("error"), text("boom")),
        ]));
        match decode(&frame) {
            Decoded::Reply(reply) => {
                let err = reply.outcome.unwrap_err();
                assert_eq!(err.code, ErrorCode::HandlerFailure);
                assert_eq!(err.message, "boom");
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_reply_error_into_rpc_error() {
        let err = ReplyError::unhandled(Method::Stream).into_rpc_error(Method::Stream);
        assert!(matches!(err, RpcError::UnhandledMethod(name) if name == "stream"));

        let err = ReplyError::validation("bad").into_rpc_error(Method::Mint);
        assert!(matches!(err, RpcError::Validation(msg) if msg == "bad"));
    }
}
