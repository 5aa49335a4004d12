pub mod types;
pub mod hash;
pub mod signing;
pub mod store;
pub mod wallet;
pub mod blobs;
pub mod config;
pub mod error;

pub use error::ReelError;
pub use types::post::{Author, Block, FeedFilter, Post, Report};
pub use store::FeedStore;
pub use wallet::{LocalMint, MintBackend, Wallet, ZapToken};
pub use blobs::{BlobCache, Distributor, Magnet, NoPeers, PeerNetwork};
pub use config::{load_config, save_config, ReelConfig};
