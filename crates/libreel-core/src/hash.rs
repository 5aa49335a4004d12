use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ciborium::Value;
use sha2::Sha256;

use crate::error::ReelError;
use crate::types::ids::ContentHash;
use crate::types::post::Post;

/// Schema version for post hashing
pub const SCHEMA_VERSION: u8 = 1;

/// Domain separator for deriving wallet keys from a recovery phrase
const WALLET_SEED_DOMAIN: &[u8] = b"reel-wallet-seed-v1";

/// Compute the post content hash using canonical CBOR + BLAKE2b-256
///
/// The id, signature and any server-assigned state are excluded so the
/// hash identifies what the author published.
pub fn compute_post_hash(post: &Post) -> Result<[u8; 32], ReelError> {
    let preimage = build_canonical_cbor(post)?;
    Ok(blake2b_256(&preimage))
}

/// Build the canonical CBOR preimage for a post
/// Format: [schema_version, magnet, title, description, sorted_tags, author_name, author_pubkey, created_at]
pub fn build_canonical_cbor(post: &Post) -> Result<Vec<u8>, ReelError> {
    let mut sorted_tags = post.tags.clone();
    sorted_tags.sort();

    let optional_text = |s: &Option<String>| match s {
        Some(t) => Value::Text(t.clone()),
        None => Value::Null,
    };

    let created_at = match post.created_at {
        Some(ts) => Value::Integer(ts.into()),
        None => Value::Null,
    };

    let array = Value::Array(vec![
        Value::Integer(SCHEMA_VERSION.into()),
        Value::Text(post.magnet.clone()),
        optional_text(&post.title),
        optional_text(&post.description),
        Value::Array(sorted_tags.into_iter().map(Value::Text).collect()),
        Value::Text(post.author.name.clone()),
        Value::Text(post.author.pubkey.clone()),
        created_at,
    ]);

    let mut buf = Vec::new();
    ciborium::into_writer(&array, &mut buf).map_err(|e| ReelError::Cbor(e.to_string()))?;
    Ok(buf)
}

/// BLAKE2b-256 of arbitrary bytes
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 content hash of a blob
pub fn content_hash(data: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive a 32-byte signing seed from a normalized recovery phrase
pub fn derive_wallet_seed(phrase: &str) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(WALLET_SEED_DOMAIN);
    hasher.update(phrase.as_bytes());
    hasher.finalize().into()
}
