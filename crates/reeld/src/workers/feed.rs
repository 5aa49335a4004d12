//! Feed worker - posts, search, moderation and author keys
//!
//! Owns the feed store exclusively. When a keypair has been installed with
//! `initKeys`, unsigned posts published under that key are signed here.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use libreel_core::config::{feed_db_path, FeedConfig};
use libreel_core::hash::compute_post_hash;
use libreel_core::signing::SigningKeyPair;
use libreel_core::types::now_ms;
use libreel_core::{Block, FeedFilter, FeedStore, Post, ReelError, Report};
use libreel_ipc::{HandlerTable, Method, Value};
use serde::Serialize;
use tracing::{debug, info};

use super::{domain_error, record_arg, required_text, sync_handler, text_arg, to_value, unsigned_arg};

/// Keypair returned by `initKeys` when it generates one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairRecord {
    pub secret_key: String,
    pub public_key: String,
}

pub struct FeedWorker {
    store: FeedStore,
    report_threshold: u32,
    keys: Mutex<Option<SigningKeyPair>>,
}

impl FeedWorker {
    pub fn new(store: FeedStore, config: &FeedConfig) -> Self {
        Self {
            store: store.with_search_index(config.search_index),
            report_threshold: config.report_threshold,
            keys: Mutex::new(None),
        }
    }

    /// Open the feed database under `data_dir`
    pub fn open(data_dir: &Path, config: &FeedConfig) -> Result<Self, ReelError> {
        let store = FeedStore::open(&feed_db_path(data_dir))?;
        Ok(Self::new(store, config))
    }

    fn keys(&self) -> MutexGuard<'_, Option<SigningKeyPair>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish_post(&self, mut post: Post) -> Result<Post, ReelError> {
        if post.author.pubkey.trim().is_empty() {
            return Err(ReelError::InvalidArgs("post author pubkey must not be empty".to_string()));
        }

        if post.sig.is_none() {
            if let Some(keys) = self.keys().as_ref() {
                if keys.public_key_hex() == post.author.pubkey {
                    // The timestamp is part of the signed content
                    post.created_at.get_or_insert_with(now_ms);
                    let digest = compute_post_hash(&post)?;
                    post.sig = Some(keys.sign_hex(&digest));
                }
            }
        }

        let stored = self.store.publish(post)?;
        info!(
            post_id = stored.id.as_deref().unwrap_or_default(),
            signed = stored.sig.is_some(),
            "post published"
        );
        Ok(stored)
    }

    pub fn query_feed(&self, filter: &FeedFilter) -> Result<Vec<Post>, ReelError> {
        self.store.query(filter, self.report_threshold)
    }

    pub fn search_posts(&self, query: &str, limit: Option<usize>) -> Result<Vec<Post>, ReelError> {
        self.store.search(query, limit, self.report_threshold)
    }

    pub fn report_post(&self, post_id: &str, reason: &str) -> Result<Report, ReelError> {
        let report = self.store.report(post_id, reason)?;
        debug!(post_id, reports = self.store.report_count(post_id)?, "post reported");
        Ok(report)
    }

    pub fn block_user(&self, pubkey: &str) -> Result<Block, ReelError> {
        let block = self.store.block(pubkey)?;
        info!(pubkey, "author blocked");
        Ok(block)
    }

    /// Install the author keypair, generating one when no secret is given
    ///
    /// Returns the generated pair, or `None` when a supplied secret was installed.
    pub fn init_keys(&self, secret_key: Option<&str>, public_key: Option<&str>) -> Result<Option<KeyPairRecord>, ReelError> {
        let (keypair, generated) = match (secret_key, public_key) {
            (Some(secret), Some(public)) => (SigningKeyPair::from_pair_hex(secret, public)?, false),
            (Some(secret), None) => (SigningKeyPair::from_seed_hex(secret)?, false),
            (None, Some(_)) => {
                return Err(ReelError::InvalidArgs(
                    "a public key needs its secret key".to_string(),
                ));
            }
            (None, None) => (SigningKeyPair::generate(), true),
        };

        let record = generated.then(|| KeyPairRecord {
            secret_key: keypair.seed_hex(),
            public_key: keypair.public_key_hex(),
        });
        info!(pubkey = %keypair.public_key_hex(), generated, "author keys installed");
        *self.keys() = Some(keypair);
        Ok(record)
    }

    pub fn public_key(&self) -> Option<String> {
        self.keys().as_ref().map(SigningKeyPair::public_key_hex)
    }

    pub fn handlers(self: Arc<Self>) -> HandlerTable {
        HandlerTable::new()
            .with(
                Method::PublishPost,
                sync_handler(&self, |w, args| {
                    let post: Post = record_arg(&args, 0, "post")?
                        .ok_or_else(|| domain_error(ReelError::InvalidArgs("post is required".into())))?;
                    to_value(&w.publish_post(post).map_err(domain_error)?)
                }),
            )
            .with(
                Method::QueryFeed,
                sync_handler(&self, |w, args| {
                    let filter: FeedFilter = record_arg(&args, 0, "filter")?.unwrap_or_default();
                    to_value(&w.query_feed(&filter).map_err(domain_error)?)
                }),
            )
            .with(
                Method::SearchPosts,
                sync_handler(&self, |w, args| {
                    let query = required_text(&args, 0, "query")?;
                    let limit = unsigned_arg(&args, 1).map(|n| n as usize);
                    to_value(&w.search_posts(&query, limit).map_err(domain_error)?)
                }),
            )
            .with(
                Method::ReportPost,
                sync_handler(&self, |w, args| {
                    let post_id = required_text(&args, 0, "postId")?;
                    let reason = required_text(&args, 1, "reason")?;
                    to_value(&w.report_post(&post_id, &reason).map_err(domain_error)?)
                }),
            )
            .with(
                Method::BlockUser,
                sync_handler(&self, |w, args| {
                    let pubkey = required_text(&args, 0, "pubkey")?;
                    to_value(&w.block_user(&pubkey).map_err(domain_error)?)
                }),
            )
            .with(
                Method::InitKeys,
                sync_handler(&self, |w, args| {
                    let secret = text_arg(&args, 0);
                    let public = text_arg(&args, 1);
                    match w.init_keys(secret.as_deref(), public.as_deref()).map_err(domain_error)? {
                        Some(record) => to_value(&record),
                        None => Ok(Value::Null),
                    }
                }),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libreel_core::signing::verify_hex;
    use libreel_core::Author;

    fn worker() -> FeedWorker {
        FeedWorker::new(FeedStore::temporary().unwrap(), &FeedConfig::default())
    }

    fn post(id: &str, pubkey: &str) -> Post {
        Post::new(
            format!("magnet:?xt=urn:btih:{}", id),
            Author {
                name: "A".to_string(),
                pubkey: pubkey.to_string(),
            },
        )
        .with_id(id)
    }

    #[test]
    fn test_generated_keys_sign_matching_posts() {
        let worker = worker();
        let record = worker.init_keys(None, None).unwrap().unwrap();
        assert_eq!(worker.public_key().as_deref(), Some(record.public_key.as_str()));

        let signed = worker.publish_post(post("p1", &record.public_key)).unwrap();
        let digest = compute_post_hash(&signed).unwrap();
        verify_hex(&digest, signed.sig.as_deref().unwrap(), &record.public_key).unwrap();

        let other = worker.publish_post(post("p2", "someone-else")).unwrap();
        assert!(other.sig.is_none());
    }

    #[test]
    fn test_supplied_keys_installed() {
        let worker = worker();
        let keypair = SigningKeyPair::generate();

        let result = worker
            .init_keys(Some(keypair.seed_hex().as_str()), Some(keypair.public_key_hex().as_str()))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(worker.public_key(), Some(keypair.public_key_hex()));
    }

    #[test]
    fn test_mismatched_keys_rejected() {
        let worker = worker();
        let a = SigningKeyPair::generate();
        let b = SigningKeyPair::generate();

        let err = worker
            .init_keys(Some(a.seed_hex().as_str()), Some(b.public_key_hex().as_str()))
            .unwrap_err();
        assert_eq!(err.error_code(), "signing_error");
        assert!(worker.public_key().is_none());

        assert!(matches!(
            worker.init_keys(None, Some(a.public_key_hex().as_str())),
            Err(ReelError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_report_unknown_post() {
        let worker = worker();
        assert!(matches!(
            worker.report_post("missing", "spam"),
            Err(ReelError::NotFound(_))
        ));
    }

    #[test]
    fn test_empty_pubkey_rejected() {
        let worker = worker();
        assert!(worker.publish_post(post("p1", " ")).is_err());
    }
}
