//! Ed25519 keys for post authors and wallets
//!
//! Signatures are detached: callers sign a 32-byte digest (post content hash,
//! zap payload hash), never the serialized record itself. Keys and
//! signatures travel as lowercase hex.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::types::ids::hex_to_id;

const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signature does not verify")]
    BadSignature,

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("public key does not match secret key")]
    KeyMismatch,
}

pub struct SigningKeyPair {
    key: SigningKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic key from a 32-byte seed (wallet phrases derive one)
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse the hex secret handed out by `initKeys`
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, SigningError> {
        let seed: [u8; 32] = hex_to_id(seed_hex).map_err(|e| SigningError::MalformedKey(e.to_string()))?;
        Ok(Self::from_seed(&seed))
    }

    /// Parse a secret and check it against the public key it was issued with
    pub fn from_pair_hex(seed_hex: &str, public_key_hex: &str) -> Result<Self, SigningError> {
        let keypair = Self::from_seed_hex(seed_hex)?;
        if !keypair.public_key_hex().eq_ignore_ascii_case(public_key_hex.trim()) {
            return Err(SigningError::KeyMismatch);
        }
        Ok(keypair)
    }

    pub fn seed_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    pub fn sign(&self, digest: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.key.sign(digest).to_bytes()
    }

    pub fn sign_hex(&self, digest: &[u8]) -> String {
        hex::encode(self.sign(digest))
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret half
        f.debug_struct("SigningKeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

pub fn parse_public_key(public_key_hex: &str) -> Result<VerifyingKey, SigningError> {
    let bytes: [u8; 32] = hex_to_id(public_key_hex).map_err(|e| SigningError::MalformedKey(e.to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SigningError::MalformedKey(e.to_string()))
}

/// Check a raw signature over `digest`
pub fn verify_raw(digest: &[u8], signature: &[u8], public_key_hex: &str) -> Result<(), SigningError> {
    let public_key = parse_public_key(public_key_hex)?;
    let bytes: [u8; SIGNATURE_LEN] = signature.try_into().map_err(|_| {
        SigningError::MalformedSignature(format!("expected {} bytes, got {}", SIGNATURE_LEN, signature.len()))
    })?;

    public_key
        .verify(digest, &Signature::from_bytes(&bytes))
        .map_err(|_| SigningError::BadSignature)
}

/// Check a hex signature, as stored on posts
pub fn verify_hex(digest: &[u8], signature_hex: &str, public_key_hex: &str) -> Result<(), SigningError> {
    let signature = hex::decode(signature_hex).map_err(|e| SigningError::MalformedSignature(e.to_string()))?;
    verify_raw(digest, &signature, public_key_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip_keeps_identity() {
        let author = SigningKeyPair::generate();
        assert_eq!(author.seed_hex().len(), 64);

        let restored = SigningKeyPair::from_seed_hex(&author.seed_hex()).unwrap();
        assert_eq!(restored.public_key_hex(), author.public_key_hex());
    }

    #[test]
    fn test_pair_must_match() {
        let a = SigningKeyPair::generate();
        let b = SigningKeyPair::generate();

        let upper = a.public_key_hex().to_uppercase();
        assert!(SigningKeyPair::from_pair_hex(&a.seed_hex(), &upper).is_ok());
        assert!(matches!(
            SigningKeyPair::from_pair_hex(&a.seed_hex(), &b.public_key_hex()),
            Err(SigningError::KeyMismatch)
        ));
    }

    #[test]
    fn test_post_digest_signature() {
        let author = SigningKeyPair::generate();
        let digest = [42u8; 32];

        let sig = author.sign_hex(&digest);
        assert_eq!(sig.len(), 128);
        verify_hex(&digest, &sig, &author.public_key_hex()).unwrap();

        let other = SigningKeyPair::generate();
        assert!(matches!(
            verify_hex(&digest, &sig, &other.public_key_hex()),
            Err(SigningError::BadSignature)
        ));
        assert!(matches!(
            verify_hex(&[0u8; 32], &sig, &author.public_key_hex()),
            Err(SigningError::BadSignature)
        ));
    }

    #[test]
    fn test_malformed_inputs() {
        let author = SigningKeyPair::generate();
        assert!(matches!(
            verify_raw(&[1u8; 32], &[0u8; 10], &author.public_key_hex()),
            Err(SigningError::MalformedSignature(_))
        ));
        assert!(matches!(
            verify_hex(&[1u8; 32], "zz", &author.public_key_hex()),
            Err(SigningError::MalformedSignature(_))
        ));
        assert!(matches!(
            SigningKeyPair::from_seed_hex("abcd"),
            Err(SigningError::MalformedKey(_))
        ));
    }
}
