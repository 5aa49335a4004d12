//! Content-addressed blob cache and magnet locators
//!
//! Blobs are addressed by SHA-256 and advertised with BitTorrent v2 style
//! magnet URIs (`urn:btmh:1220<sha256>`). Peer discovery and transfer live
//! behind [`PeerNetwork`].

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tempfile::NamedTempFile;
use tracing::{debug, info};
use url::{form_urlencoded, Url};

use crate::error::ReelError;
use crate::hash::content_hash;
use crate::types::ids::{hex_to_id, ContentHash};

/// Exact-topic prefix for a SHA-256 multihash
const BTMH_PREFIX: &str = "urn:btmh:1220";

/// Parsed magnet URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Magnet {
    pub hash: ContentHash,
    /// Exact length in bytes (`xl`)
    pub length: Option<u64>,
    /// Display name (`dn`)
    pub name: Option<String>,
    /// Tracker URLs (`tr`)
    pub trackers: Vec<String>,
}

impl Magnet {
    /// Magnet for the given content
    pub fn for_content(data: &[u8]) -> Self {
        Self {
            hash: content_hash(data),
            length: Some(data.len() as u64),
            name: None,
            trackers: Vec::new(),
        }
    }

    pub fn with_trackers(mut self, trackers: Vec<String>) -> Self {
        self.trackers = trackers;
        self
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Parse a magnet URI carrying a SHA-256 exact topic
    pub fn parse(uri: &str) -> Result<Self, ReelError> {
        let url = Url::parse(uri).map_err(|e| ReelError::InvalidArgs(format!("not a magnet URI: {}: {}", uri, e)))?;
        if url.scheme() != "magnet" {
            return Err(ReelError::InvalidArgs(format!("not a magnet URI: {}", uri)));
        }

        let mut hash = None;
        let mut length = None;
        let mut name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if let Some(hex_hash) = value.strip_prefix(BTMH_PREFIX) {
                        let parsed: ContentHash = hex_to_id(hex_hash)
                            .map_err(|e| ReelError::InvalidArgs(format!("bad magnet hash: {}", e)))?;
                        hash = Some(parsed);
                    }
                }
                "xl" => {
                    length = Some(
                        value
                            .parse::<u64>()
                            .map_err(|e| ReelError::InvalidArgs(format!("bad magnet length: {}", e)))?,
                    );
                }
                "dn" => name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let hash = hash.ok_or_else(|| {
            ReelError::InvalidArgs(format!("magnet has no {} exact topic: {}", BTMH_PREFIX, uri))
        })?;

        Ok(Self {
            hash,
            length,
            name,
            trackers,
        })
    }
}

impl fmt::Display for Magnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The exact topic stays readable; everything after it is form-encoded
        let mut query = form_urlencoded::Serializer::for_suffix(format!("xt={}{}", BTMH_PREFIX, self.hash_hex()), 0);
        if let Some(length) = self.length {
            query.append_pair("xl", &length.to_string());
        }
        if let Some(name) = &self.name {
            query.append_pair("dn", name);
        }
        for tracker in &self.trackers {
            query.append_pair("tr", tracker);
        }
        write!(f, "magnet:?{}", query.finish())
    }
}

impl FromStr for Magnet {
    type Err = ReelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Durable blob cache on disk, one file per SHA-256
#[derive(Debug, Clone)]
pub struct BlobCache {
    root: PathBuf,
}

impl BlobCache {
    /// Open or create a cache rooted at `root`
    ///
    /// The root is canonicalized so cached blobs always have a `file://` URL.
    pub fn open(root: &Path) -> Result<Self, ReelError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: std::fs::canonicalize(root)?,
        })
    }

    pub fn path_for(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hex::encode(hash))
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.path_for(hash).is_file()
    }

    /// Store a blob, returning its hash
    pub fn put(&self, data: &[u8]) -> Result<ContentHash, ReelError> {
        let hash = content_hash(data);
        let path = self.path_for(&hash);
        if path.is_file() {
            return Ok(hash);
        }

        // Readers never observe a partial blob; the temp file is removed on any failure
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| ReelError::Io(e.error))?;
        debug!(hash = %hex::encode(hash), bytes = data.len(), "blob cached");
        Ok(hash)
    }

    pub fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>, ReelError> {
        let path = self.path_for(hash);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }

    /// Playable `file://` URL for a cached blob
    pub fn url_for(&self, hash: &ContentHash) -> Result<String, ReelError> {
        let path = self.path_for(hash);
        Url::from_file_path(&path)
            .map(String::from)
            .map_err(|_| ReelError::Internal(format!("no file URL for {}", path.display())))
    }
}

/// Source of blobs that are not in the local cache
pub trait PeerNetwork: Send + Sync {
    fn fetch(&self, magnet: &Magnet) -> Result<Option<Vec<u8>>, ReelError>;
}

/// Network with no reachable peers
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPeers;

impl PeerNetwork for NoPeers {
    fn fetch(&self, _magnet: &Magnet) -> Result<Option<Vec<u8>>, ReelError> {
        Ok(None)
    }
}

/// Seeds blobs and resolves magnets, cache first
pub struct Distributor {
    cache: BlobCache,
    network: Box<dyn PeerNetwork>,
    trackers: Vec<String>,
}

impl Distributor {
    pub fn new(cache: BlobCache, network: Box<dyn PeerNetwork>) -> Self {
        Self {
            cache,
            network,
            trackers: Vec::new(),
        }
    }

    pub fn with_trackers(mut self, trackers: Vec<String>) -> Self {
        self.trackers = trackers;
        self
    }

    pub fn cache(&self) -> &BlobCache {
        &self.cache
    }

    /// Mirror a blob into the cache and return its magnet
    pub fn seed(&self, data: &[u8]) -> Result<Magnet, ReelError> {
        if data.is_empty() {
            return Err(ReelError::InvalidArgs("cannot seed an empty file".to_string()));
        }
        self.cache.put(data)?;
        let magnet = Magnet::for_content(data).with_trackers(self.trackers.clone());
        info!(hash = %magnet.hash_hex(), bytes = data.len(), "seeding file");
        Ok(magnet)
    }

    /// Resolve a magnet to a playable URL, fetching from peers on a cache miss
    pub fn stream(&self, locator: &str) -> Result<String, ReelError> {
        let magnet = Magnet::parse(locator)?;
        if self.cache.contains(&magnet.hash) {
            debug!(hash = %magnet.hash_hex(), "stream served from cache");
            return self.cache.url_for(&magnet.hash);
        }

        let data = self
            .network
            .fetch(&magnet)?
            .ok_or_else(|| ReelError::NotFound(format!("no peers for {}", magnet.hash_hex())))?;

        let actual = content_hash(&data);
        if actual != magnet.hash {
            return Err(ReelError::HashMismatch {
                expected: magnet.hash_hex(),
                actual: hex::encode(actual),
            });
        }

        self.cache.put(&data)?;
        debug!(hash = %magnet.hash_hex(), "stream fetched from network");
        self.cache.url_for(&magnet.hash)
    }
}
