use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ReelError;

/// Name of the config file inside the data directory
pub const CONFIG_FILE: &str = "config.toml";

/// Daemon configuration stored in `<data_dir>/config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReelConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub distribution: DistributionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// TCP address the gateway listens on
    pub listen: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:7420".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Per-call deadline in milliseconds (0 = wait indefinitely)
    pub call_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Posts with at least this many reports are hidden
    pub report_threshold: u32,
    /// Maintain a token index for search
    pub search_index: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            report_threshold: 3,
            search_index: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Settle mint invoices immediately (local development mint)
    pub auto_pay_invoices: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            auto_pay_invoices: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Tracker URLs appended to generated magnet URIs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trackers: Vec<String>,
}

/// Load config from `<data_dir>/config.toml`
pub fn load_config(data_dir: &Path) -> Result<Option<ReelConfig>, ReelError> {
    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&config_path)?;
    let config: ReelConfig = toml::from_str(&content)?;
    Ok(Some(config))
}

/// Save config to `<data_dir>/config.toml`
pub fn save_config(data_dir: &Path, config: &ReelConfig) -> Result<(), ReelError> {
    std::fs::create_dir_all(data_dir)?;
    let content = toml::to_string_pretty(config)?;
    std::fs::write(data_dir.join(CONFIG_FILE), content)?;
    Ok(())
}

/// Path of the feed sled database
pub fn feed_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("feed")
}

/// Path of the blob cache directory
pub fn blob_cache_path(data_dir: &Path) -> PathBuf {
    data_dir.join("blobs")
}
