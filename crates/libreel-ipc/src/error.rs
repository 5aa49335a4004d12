//! RPC error types

use thiserror::Error;

/// Errors surfaced by RPC calls
#[derive(Error, Debug)]
pub enum RpcError {
    /// Method name is not in the schema registry
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// Arguments do not match the method's parameter shape
    #[error("validation error: {0}")]
    Validation(String),

    /// The server has no handler for a validated call
    #[error("no handler registered for {0}")]
    UnhandledMethod(String),

    /// The domain handler failed; `detail` carries its error code when known
    #[error("handler failed: {message}")]
    HandlerFailure {
        detail: Option<String>,
        message: String,
    },

    /// Transport terminated with the call outstanding
    #[error("transport closed")]
    TransportClosed,

    /// No reply within the call deadline
    #[error("call timed out after {0}ms")]
    Timeout(u64),

    /// Envelope could not be encoded or a frame was invalid
    #[error("codec error: {0}")]
    Codec(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            RpcError::UnknownMethod(_) => codes::UNKNOWN_METHOD,
            RpcError::Validation(_) => codes::VALIDATION_ERROR,
            RpcError::UnhandledMethod(_) => codes::UNHANDLED_METHOD,
            RpcError::HandlerFailure { .. } => codes::HANDLER_FAILURE,
            RpcError::TransportClosed => codes::TRANSPORT_CLOSED,
            RpcError::Timeout(_) => codes::TIMEOUT,
            RpcError::Codec(_) => codes::CODEC_ERROR,
            RpcError::Io(_) => codes::IO_ERROR,
        }
    }

    /// Domain error code relayed by a failing handler
    pub fn detail(&self) -> Option<&str> {
        match self {
            RpcError::HandlerFailure { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

/// Error codes; the first three also travel in reply envelopes
pub mod codes {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const UNHANDLED_METHOD: &str = "unhandled_method";
    pub const HANDLER_FAILURE: &str = "handler_failure";
    pub const UNKNOWN_METHOD: &str = "unknown_method";
    pub const TRANSPORT_CLOSED: &str = "transport_closed";
    pub const TIMEOUT: &str = "timeout";
    pub const CODEC_ERROR: &str = "codec_error";
    pub const IO_ERROR: &str = "io_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(RpcError::TransportClosed.code(), "transport_closed");
        assert_eq!(RpcError::Validation("x".into()).code(), "validation_error");
        assert_eq!(RpcError::Timeout(5).to_string(), "call timed out after 5ms");
    }

    #[test]
    fn test_handler_failure_detail() {
        let err = RpcError::HandlerFailure {
            detail: Some("insufficient_funds".to_string()),
            message: "insufficient funds".to_string(),
        };
        assert_eq!(err.detail(), Some("insufficient_funds"));
        assert_eq!(RpcError::TransportClosed.detail(), None);
    }
}
