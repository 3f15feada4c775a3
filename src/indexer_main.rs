//! State-expiry indexer binary
//!
//! Downloads completed block ranges from a node, reduces their state diffs
//! and keeps the last-access store up to date until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use expiry_indexer::cache::RangeCache;
use expiry_indexer::config::{IndexerConfig, DEFAULT_RANGE_SIZE};
use expiry_indexer::indexer::Indexer;
use expiry_indexer::reduce::DecodePolicy;
use expiry_indexer::rpc::RpcClient;
use expiry_indexer::store::{open_store, Backend};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// State-expiry last-access indexer
#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Index the last block each account and storage slot was touched")]
struct Args {
    /// RPC endpoint URL (must serve trace_replayBlockTransactions)
    #[arg(short, long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// Directory holding cached range files
    #[arg(long, default_value = "./ranges")]
    data_dir: PathBuf,

    /// Path to RocksDB database directory
    #[arg(short, long, default_value = "./expiry_db")]
    db_path: PathBuf,

    /// Persistence strategy
    #[arg(short, long, value_enum, default_value_t = Backend::Snapshot)]
    backend: Backend,

    /// Blocks per range
    #[arg(long, default_value_t = DEFAULT_RANGE_SIZE)]
    range_size: u64,

    /// Maximum number of ranges downloaded at once
    #[arg(short, long, default_value_t = 4)]
    concurrency: usize,

    /// Abort on malformed diff entries instead of skipping them
    #[arg(long)]
    strict: bool,

    /// Seconds between polls once caught up
    #[arg(long, default_value_t = 12)]
    poll_interval: u64,
}

impl From<Args> for IndexerConfig {
    fn from(args: Args) -> Self {
        Self {
            rpc_url: args.rpc_url,
            data_dir: args.data_dir,
            db_path: args.db_path,
            backend: args.backend,
            range_size: args.range_size,
            download_concurrency: args.concurrency,
            decode_policy: if args.strict { DecodePolicy::Strict } else { DecodePolicy::Lenient },
            poll_interval_secs: args.poll_interval,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = IndexerConfig::from(Args::parse());
    config.validate().context("Invalid configuration")?;

    info!("Starting state-expiry indexer");
    info!("RPC URL: {}", config.rpc_url);
    info!("Range cache: {:?}", config.data_dir);
    info!("Database: {:?} ({:?} backend)", config.db_path, config.backend);

    let store = open_store(config.backend, &config.db_path)
        .with_context(|| format!("Failed to open database at {:?}", config.db_path))?;
    let cache = RangeCache::new(
        config.data_dir.clone(),
        config.range_spec()?,
        RpcClient::new(config.rpc_url.clone()),
    );

    let cancel = CancellationToken::new();
    let indexer = Indexer::new(
        cache,
        store,
        config.decode_policy,
        config.download_concurrency,
        cancel.clone(),
    );

    // Handle Ctrl+C gracefully: cancel, then let the range in flight finish.
    let run = indexer.run(config.poll_interval());
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => {
            result.context("Indexer error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            cancel.cancel();
            run.await.context("Indexer error during shutdown")?;
        }
    }

    info!("Indexer stopped");
    Ok(())
}
