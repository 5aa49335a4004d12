use thiserror::Error;

/// 256-bit content identifier (SHA-256 of a blob)
pub type ContentHash = [u8; 32];

#[derive(Debug, Error)]
pub enum IdParseError {
    #[error("invalid hex string: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Generate a fresh post id
pub fn generate_post_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a fresh report id
pub fn generate_report_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parse a hex string into a fixed-size byte array
pub fn hex_to_id<const N: usize>(hex_str: &str) -> Result<[u8; N], IdParseError> {
    let bytes = hex::decode(hex_str)?;
    if bytes.len() != N {
        return Err(IdParseError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
