//! Indexer configuration
//!
//! Collected from the command line by the `indexer` binary and validated
//! before anything is opened.

use crate::range::RangeSpec;
use crate::reduce::DecodePolicy;
use crate::store::Backend;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default number of blocks per range.
pub const DEFAULT_RANGE_SIZE: u64 = 1000;

/// Settings for one ingestion process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Node JSON-RPC endpoint
    pub rpc_url: String,
    /// Directory holding cached range files
    pub data_dir: PathBuf,
    /// RocksDB directory of the last-access store
    pub db_path: PathBuf,
    pub backend: Backend,
    pub range_size: u64,
    /// Maximum number of ranges downloaded at once
    pub download_concurrency: usize,
    pub decode_policy: DecodePolicy,
    pub poll_interval_secs: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            data_dir: PathBuf::from("./ranges"),
            db_path: PathBuf::from("./expiry_db"),
            backend: Backend::default(),
            range_size: DEFAULT_RANGE_SIZE,
            download_concurrency: 4,
            decode_policy: DecodePolicy::default(),
            poll_interval_secs: 12,
        }
    }
}

impl IndexerConfig {
    /// Check the settings for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.trim().is_empty() {
            anyhow::bail!("RPC URL must not be empty");
        }
        if self.download_concurrency == 0 {
            anyhow::bail!("Download concurrency must be at least 1");
        }
        self.range_spec()?;
        Ok(())
    }

    pub fn range_spec(&self) -> Result<RangeSpec> {
        RangeSpec::new(self.range_size).context("Range size must be greater than zero")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
