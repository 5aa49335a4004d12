use thiserror::Error;

use crate::signing::SigningError;

/// Main error type for reel domain operations
#[derive(Debug, Error)]
pub enum ReelError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not initialized: {0}")]
    Uninitialized(String),

    #[error("insufficient funds: need {needed} sats, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("invoice {0} is unpaid")]
    InvoiceUnpaid(String),

    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("CBOR error: {0}")]
    Cbor(String),

    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ReelError {
    /// Stable machine-readable code, relayed to RPC callers alongside the message
    pub fn error_code(&self) -> &'static str {
        match self {
            ReelError::InvalidArgs(_) => "invalid_args",
            ReelError::NotFound(_) => "not_found",
            ReelError::Uninitialized(_) => "uninitialized",
            ReelError::InsufficientFunds { .. } => "insufficient_funds",
            ReelError::InvoiceUnpaid(_) => "invoice_unpaid",
            ReelError::HashMismatch { .. } => "hash_mismatch",
            ReelError::Io(_) => "io_error",
            ReelError::Sled(_) => "db_error",
            ReelError::Json(_) => "internal_error",
            ReelError::TomlParse(_) => "invalid_args",
            ReelError::TomlSerialize(_) => "internal_error",
            ReelError::Cbor(_) => "internal_error",
            ReelError::Signing(_) => "signing_error",
            ReelError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ReelError::NotFound("x".into()).error_code(), "not_found");
        assert_eq!(
            ReelError::InsufficientFunds { needed: 5, available: 1 }.error_code(),
            "insufficient_funds"
        );
        assert_eq!(ReelError::Uninitialized("wallet".into()).error_code(), "uninitialized");
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = ReelError::InsufficientFunds { needed: 10, available: 3 };
        assert_eq!(err.to_string(), "insufficient funds: need 10 sats, have 3");
    }
}
