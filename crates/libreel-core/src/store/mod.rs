use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use tracing::debug;

use crate::error::ReelError;
use crate::types::ids::{generate_post_id, generate_report_id};
use crate::types::now_ms;
use crate::types::post::{Block, FeedFilter, Post, Report};

/// Default number of search results
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Statistics about the feed database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStats {
    /// Distinct post ids
    pub post_count: usize,
    /// Entries in the append-only log (republished posts count once per version)
    pub log_len: usize,
    pub report_count: usize,
    pub block_count: usize,
}

/// Feed storage backed by sled
///
/// Posts are kept in an append-only log keyed by a monotonically increasing
/// sequence number; `post_index` points each id at its latest version.
pub struct FeedStore {
    db: sled::Db,
    posts: sled::Tree,
    post_index: sled::Tree,
    reports: sled::Tree,
    blocks: sled::Tree,
    terms: sled::Tree,
    search_index: bool,
}

impl FeedStore {
    /// Open or create a store at the given path
    pub fn open(path: &Path) -> Result<Self, ReelError> {
        Self::from_db(sled::open(path)?)
    }

    /// Open a store that is deleted when dropped
    pub fn temporary() -> Result<Self, ReelError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> Result<Self, ReelError> {
        let posts = db.open_tree("posts")?;
        let post_index = db.open_tree("post_index")?;
        let reports = db.open_tree("reports")?;
        let blocks = db.open_tree("blocks")?;
        let terms = db.open_tree("terms")?;

        Ok(Self {
            db,
            posts,
            post_index,
            reports,
            blocks,
            terms,
            search_index: true,
        })
    }

    /// Enable or disable the token index used by `search`
    pub fn with_search_index(mut self, enabled: bool) -> Self {
        self.search_index = enabled;
        self
    }

    /// Append a post to the log, assigning id and timestamp when absent
    pub fn publish(&self, mut post: Post) -> Result<Post, ReelError> {
        if post.magnet.trim().is_empty() {
            return Err(ReelError::InvalidArgs("post magnet must not be empty".to_string()));
        }

        let id = match post.id.take() {
            Some(id) if !id.is_empty() => id,
            _ => generate_post_id(),
        };
        post.id = Some(id.clone());
        if post.created_at.is_none() {
            post.created_at = Some(now_ms());
        }

        let seq = self.db.generate_id()?;
        self.posts.insert(seq.to_be_bytes(), serde_json::to_vec(&post)?)?;

        let previous = self.post_index.insert(id.as_bytes(), seq.to_be_bytes().to_vec())?;
        if self.search_index {
            if let Some(prev_seq) = previous {
                if let Some(prev) = self.post_at(&prev_seq)? {
                    self.unindex_terms(&id, &prev)?;
                }
            }
            self.index_terms(&id, &post)?;
        }

        debug!(post_id = %id, seq, "post published");
        Ok(post)
    }

    /// Get the latest version of a post
    pub fn get_post(&self, id: &str) -> Result<Option<Post>, ReelError> {
        match self.post_index.get(id.as_bytes())? {
            Some(seq) => self.post_at(&seq),
            None => Ok(None),
        }
    }

    /// Latest version of every post, with its log sequence number
    fn latest_posts(&self) -> Result<Vec<(u64, Post)>, ReelError> {
        let mut posts = Vec::new();
        for result in self.post_index.iter() {
            let (_, seq_bytes) = result?;
            let seq = decode_seq(&seq_bytes)?;
            if let Some(post) = self.post_at(&seq_bytes)? {
                posts.push((seq, post));
            }
        }
        Ok(posts)
    }

    fn post_at(&self, seq_bytes: &[u8]) -> Result<Option<Post>, ReelError> {
        match self.posts.get(seq_bytes)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a post passes moderation (author not blocked, under the report threshold)
    ///
    /// A threshold of zero disables report-based hiding.
    fn is_visible(&self, post: &Post, report_threshold: u32) -> Result<bool, ReelError> {
        if self.is_blocked(&post.author.pubkey)? {
            return Ok(false);
        }
        if report_threshold == 0 {
            return Ok(true);
        }
        let reports = match post.id.as_deref() {
            Some(id) => self.report_count(id)?,
            None => 0,
        };
        Ok(reports < report_threshold as usize)
    }

    /// List visible posts, newest first
    pub fn query(&self, filter: &FeedFilter, report_threshold: u32) -> Result<Vec<Post>, ReelError> {
        let mut visible = Vec::new();
        for (seq, post) in self.latest_posts()? {
            if !filter.tags.is_empty() && !post.has_any_tag(&filter.tags) {
                continue;
            }
            if self.is_visible(&post, report_threshold)? {
                visible.push((seq, post));
            }
        }

        Ok(newest_first(visible, filter.limit))
    }

    /// Search visible posts by title, description and tags
    ///
    /// Uses the token index when enabled; falls back to a case-insensitive
    /// substring scan when the index is disabled or finds nothing.
    pub fn search(
        &self,
        query: &str,
        limit: Option<usize>,
        report_threshold: u32,
    ) -> Result<Vec<Post>, ReelError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

        let indexed = if self.search_index {
            self.lookup_terms(&tokenize(query))?
        } else {
            HashSet::new()
        };

        let needle = query.to_lowercase();
        let use_index = !indexed.is_empty();
        debug!(query, use_index, "searching posts");

        let mut hits = Vec::new();
        for (seq, post) in self.latest_posts()? {
            let matched = if use_index {
                post.id.as_ref().is_some_and(|id| indexed.contains(id))
            } else {
                post.searchable_text().to_lowercase().contains(&needle)
            };
            if matched && self.is_visible(&post, report_threshold)? {
                hits.push((seq, post));
            }
        }

        Ok(newest_first(hits, Some(limit)))
    }

    fn index_terms(&self, id: &str, post: &Post) -> Result<(), ReelError> {
        for term in tokenize(&post.searchable_text()) {
            self.terms.insert(term_key(&term, id), Vec::<u8>::new())?;
        }
        Ok(())
    }

    fn unindex_terms(&self, id: &str, post: &Post) -> Result<(), ReelError> {
        for term in tokenize(&post.searchable_text()) {
            self.terms.remove(term_key(&term, id))?;
        }
        Ok(())
    }

    /// Ids of posts containing every token
    fn lookup_terms(&self, tokens: &BTreeSet<String>) -> Result<HashSet<String>, ReelError> {
        let mut result: Option<HashSet<String>> = None;
        for token in tokens {
            let prefix = term_key(token, "");
            let mut ids = HashSet::new();
            for entry in self.terms.scan_prefix(&prefix) {
                let (key, _) = entry?;
                let id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
                ids.insert(id);
            }
            result = Some(match result {
                Some(acc) => acc.intersection(&ids).cloned().collect(),
                None => ids,
            });
        }
        Ok(result.unwrap_or_default())
    }

    /// File a report against an existing post
    pub fn report(&self, post_id: &str, reason: &str) -> Result<Report, ReelError> {
        if self.post_index.get(post_id.as_bytes())?.is_none() {
            return Err(ReelError::NotFound(format!("post {} not found", post_id)));
        }

        let report = Report {
            id: generate_report_id(),
            post_id: post_id.to_string(),
            reason: reason.to_string(),
            created_at: now_ms(),
        };
        self.reports
            .insert(report_key(post_id, &report.id), serde_json::to_vec(&report)?)?;

        debug!(post_id, report_id = %report.id, "post reported");
        Ok(report)
    }

    /// Number of reports filed against a post
    pub fn report_count(&self, post_id: &str) -> Result<usize, ReelError> {
        let mut count = 0;
        for entry in self.reports.scan_prefix(report_key(post_id, "")) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// All reports filed against a post
    pub fn reports_for(&self, post_id: &str) -> Result<Vec<Report>, ReelError> {
        let mut reports = Vec::new();
        for entry in self.reports.scan_prefix(report_key(post_id, "")) {
            let (_, value) = entry?;
            reports.push(serde_json::from_slice(&value)?);
        }
        Ok(reports)
    }

    /// Block an author; blocking twice keeps the original record
    pub fn block(&self, pubkey: &str) -> Result<Block, ReelError> {
        if pubkey.is_empty() {
            return Err(ReelError::InvalidArgs("public key must not be empty".to_string()));
        }
        if let Some(existing) = self.blocks.get(pubkey.as_bytes())? {
            return Ok(serde_json::from_slice(&existing)?);
        }

        let block = Block {
            pubkey: pubkey.to_string(),
            created_at: now_ms(),
        };
        self.blocks.insert(pubkey.as_bytes(), serde_json::to_vec(&block)?)?;
        debug!(pubkey, "author blocked");
        Ok(block)
    }

    pub fn is_blocked(&self, pubkey: &str) -> Result<bool, ReelError> {
        Ok(self.blocks.contains_key(pubkey.as_bytes())?)
    }

    pub fn blocked(&self) -> Result<Vec<Block>, ReelError> {
        let mut blocks = Vec::new();
        for entry in self.blocks.iter() {
            let (_, value) = entry?;
            blocks.push(serde_json::from_slice(&value)?);
        }
        Ok(blocks)
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            post_count: self.post_index.len(),
            log_len: self.posts.len(),
            report_count: self.reports.len(),
            block_count: self.blocks.len(),
        }
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), ReelError> {
        self.db.flush()?;
        Ok(())
    }
}

fn newest_first(mut posts: Vec<(u64, Post)>, limit: Option<usize>) -> Vec<Post> {
    posts.sort_by(|(seq_a, a), (seq_b, b)| (b.created_at, seq_b).cmp(&(a.created_at, seq_a)));
    let iter = posts.into_iter().map(|(_, post)| post);
    match limit {
        Some(n) => iter.take(n).collect(),
        None => iter.collect(),
    }
}

/// Lowercase alphanumeric tokens
fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn decode_seq(bytes: &[u8]) -> Result<u64, ReelError> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| ReelError::Internal(format!("corrupt sequence key of {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

fn term_key(term: &str, id: &str) -> Vec<u8> {
    format!("{}\0{}", term, id).into_bytes()
}

fn report_key(post_id: &str, report_id: &str) -> Vec<u8> {
    format!("{}\0{}", post_id, report_id).into_bytes()
}
