//! Distribution worker - seeding blobs and resolving magnets

use std::path::Path;
use std::sync::Arc;

use libreel_core::config::{blob_cache_path, DistributionConfig};
use libreel_core::{BlobCache, Distributor, NoPeers, PeerNetwork, ReelError};
use libreel_ipc::{HandlerTable, Method, Value};
use tracing::info;

use super::{domain_error, required_text, sync_handler, to_value};

pub struct DistributionWorker {
    distributor: Distributor,
}

impl DistributionWorker {
    pub fn new(distributor: Distributor) -> Self {
        Self { distributor }
    }

    /// Open the blob cache under `data_dir` with no peer network
    pub fn open(data_dir: &Path, config: &DistributionConfig) -> Result<Self, ReelError> {
        Self::open_with_network(data_dir, config, Box::new(NoPeers))
    }

    pub fn open_with_network(
        data_dir: &Path,
        config: &DistributionConfig,
        network: Box<dyn PeerNetwork>,
    ) -> Result<Self, ReelError> {
        let cache = BlobCache::open(&blob_cache_path(data_dir))?;
        let distributor = Distributor::new(cache, network).with_trackers(config.trackers.clone());
        Ok(Self::new(distributor))
    }

    /// Store a blob and return its magnet URI
    pub fn seed_file(&self, data: &[u8]) -> Result<String, ReelError> {
        let magnet = self.distributor.seed(data)?.to_string();
        info!(bytes = data.len(), magnet = %magnet, "file seeded");
        Ok(magnet)
    }

    /// Resolve a magnet URI to a playable URL
    pub fn stream(&self, locator: &str) -> Result<String, ReelError> {
        self.distributor.stream(locator)
    }

    pub fn handlers(self: Arc<Self>) -> HandlerTable {
        HandlerTable::new()
            .with(
                Method::SeedFile,
                sync_handler(&self, |w, args| match args.first() {
                    Some(Value::Bytes(data)) => to_value(&w.seed_file(data).map_err(domain_error)?),
                    _ => Err(domain_error(ReelError::InvalidArgs("file bytes are required".into()))),
                }),
            )
            .with(
                Method::Stream,
                sync_handler(&self, |w, args| {
                    let locator = required_text(&args, 0, "locator")?;
                    to_value(&w.stream(&locator).map_err(domain_error)?)
                }),
            )
    }
}
