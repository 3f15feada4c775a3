//! CLI implementation for expctl
//!
//! Inspects a last-access store and the range cache. All commands output
//! pretty JSON.

use crate::cache::RangeCache;
use crate::config::DEFAULT_RANGE_SIZE;
use crate::eventlog::EventLogStore;
use crate::range::{parse_range_file_name, RangeSpec};
use crate::rpc::{RpcClient, TraceSource};
use crate::store::{open_store, Backend, LastAccessStore};
use crate::types::{parse_address, parse_slot};
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Expiry indexer CLI tool
#[derive(Parser)]
#[command(name = "expctl")]
#[command(about = "Inspect state-expiry last-access data")]
pub struct Cli {
    /// Path to the RocksDB database directory
    #[arg(short, long, default_value = "./expiry_db", global = true)]
    db_path: PathBuf,

    /// Persistence strategy of the database
    #[arg(short, long, value_enum, default_value_t = Backend::Snapshot, global = true)]
    backend: Backend,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the watermark and whether the store has caught up
    Status {
        /// Latest completed range; asked from the node when omitted
        #[arg(long)]
        latest_range: Option<u64>,
        /// RPC endpoint URL
        #[arg(long, default_value = "http://127.0.0.1:8545")]
        rpc_url: String,
        /// Blocks per range
        #[arg(long, default_value_t = DEFAULT_RANGE_SIZE)]
        range_size: u64,
    },
    /// Get the last access of an account
    Account {
        /// Ethereum address (hex, with or without 0x prefix)
        address: String,
    },
    /// Get the last access of a storage slot
    Storage {
        /// Ethereum address (hex, with or without 0x prefix)
        address: String,
        /// Storage slot in hex (with or without 0x prefix)
        slot: String,
    },
    /// Check whether an account (or one of its slots) was untouched since a block
    Expired {
        /// Ethereum address (hex, with or without 0x prefix)
        address: String,
        /// Expiry boundary block
        block: u64,
        /// Storage slot in hex; checks the account when omitted
        #[arg(long)]
        slot: Option<String>,
    },
    /// List every recorded touch of an account (log backend only)
    History {
        /// Ethereum address (hex, with or without 0x prefix)
        address: String,
        /// Storage slot in hex; lists account touches when omitted
        #[arg(long)]
        slot: Option<String>,
    },
    /// Download one range into the cache
    Download {
        /// Range number (1-based)
        range: u64,
        /// RPC endpoint URL
        #[arg(long, default_value = "http://127.0.0.1:8545")]
        rpc_url: String,
        /// Directory holding cached range files
        #[arg(long, default_value = "./ranges")]
        data_dir: PathBuf,
        /// Blocks per range
        #[arg(long, default_value_t = DEFAULT_RANGE_SIZE)]
        range_size: u64,
    },
    /// List the range files present in the cache
    Ranges {
        /// Directory holding cached range files
        #[arg(long, default_value = "./ranges")]
        data_dir: PathBuf,
    },
}

fn address_arg(s: &str) -> Result<Address> {
    parse_address(s).with_context(|| format!("Invalid address: {}", s))
}

fn slot_arg(s: &str) -> Result<B256> {
    parse_slot(s).with_context(|| format!("Invalid storage slot: {}", s))
}

fn range_spec(size: u64) -> Result<RangeSpec> {
    RangeSpec::new(size).context("Range size must be greater than zero")
}

fn open(cli: &Cli) -> Result<Box<dyn LastAccessStore>> {
    open_store(cli.backend, &cli.db_path)
        .with_context(|| format!("Failed to open database at {:?}", cli.db_path))
}

/// Group the scanned block map back into one entry per file.
fn list_ranges(data_dir: &Path) -> Result<Value> {
    if !data_dir.exists() {
        return Ok(json!({ "data_dir": data_dir, "ranges": [] }));
    }
    let files = crate::range::scan_range_files(data_dir)
        .with_context(|| format!("Failed to scan {:?}", data_dir))?;

    let mut by_file: BTreeMap<u64, Value> = BTreeMap::new();
    for path in files.values() {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if let Some((start, end)) = parse_range_file_name(name) {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            by_file.entry(start).or_insert_with(|| {
                json!({ "start": start, "end": end, "file": path, "bytes": size })
            });
        }
    }
    Ok(json!({
        "data_dir": data_dir,
        "ranges": by_file.into_values().collect::<Vec<_>>(),
    }))
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;

    let result = match &cli.command {
        Commands::Status { latest_range, rpc_url, range_size } => {
            let spec = range_spec(*range_size)?;
            let latest = match latest_range {
                Some(range) => *range,
                None => {
                    let rpc = RpcClient::new(rpc_url.clone());
                    let head = runtime
                        .block_on(rpc.latest_block_number())
                        .context("Failed to get latest block number")?;
                    spec.range_number(head)
                }
            };
            let status = open(&cli)?.sync_status(latest, spec.size())?;
            json!({
                "backend": cli.backend,
                "latest_range": latest,
                "status": status,
            })
        }
        Commands::Account { address } => {
            let addr = address_arg(address)?;
            let access = open(&cli)?.account_access(addr)?;
            json!({
                "address": format!("0x{:x}", addr),
                "access": access,
            })
        }
        Commands::Storage { address, slot } => {
            let addr = address_arg(address)?;
            let slot = slot_arg(slot)?;
            let last = open(&cli)?.storage_access(addr, slot)?;
            json!({
                "address": format!("0x{:x}", addr),
                "slot": format!("0x{:x}", slot),
                "last_access_block": last,
            })
        }
        Commands::Expired { address, block, slot } => {
            let addr = address_arg(address)?;
            let store = open(&cli)?;
            match slot {
                Some(slot) => {
                    let slot = slot_arg(slot)?;
                    json!({
                        "address": format!("0x{:x}", addr),
                        "slot": format!("0x{:x}", slot),
                        "block": block,
                        "expired": store.is_storage_expired(addr, slot, *block)?,
                    })
                }
                None => json!({
                    "address": format!("0x{:x}", addr),
                    "block": block,
                    "expired": store.is_account_expired(addr, *block)?,
                }),
            }
        }
        Commands::History { address, slot } => {
            if cli.backend != Backend::Log {
                anyhow::bail!("History is only recorded by the log backend");
            }
            let addr = address_arg(address)?;
            let store = EventLogStore::open(&cli.db_path)
                .with_context(|| format!("Failed to open database at {:?}", cli.db_path))?;
            match slot {
                Some(slot) => {
                    let slot = slot_arg(slot)?;
                    let events: Vec<Value> = store
                        .storage_history(addr, slot)?
                        .into_iter()
                        .map(|e| json!({ "block": e.block, "seq": e.seq }))
                        .collect();
                    json!({
                        "address": format!("0x{:x}", addr),
                        "slot": format!("0x{:x}", slot),
                        "events": events,
                    })
                }
                None => {
                    let events: Vec<Value> = store
                        .account_history(addr)?
                        .into_iter()
                        .map(|e| json!({ "block": e.block, "seq": e.seq, "is_contract": e.is_contract }))
                        .collect();
                    json!({
                        "address": format!("0x{:x}", addr),
                        "events": events,
                    })
                }
            }
        }
        Commands::Download { range, rpc_url, data_dir, range_size } => {
            let spec = range_spec(*range_size)?;
            let blocks = spec
                .range(*range)
                .with_context(|| format!("Range {} is out of bounds for size {}", range, range_size))?;
            let cache = RangeCache::new(data_dir.clone(), spec, RpcClient::new(rpc_url.clone()));
            runtime
                .block_on(cache.ensure_range_exists(*range, &CancellationToken::new()))
                .with_context(|| format!("Failed to download range {}", range))?;
            json!({
                "status": "ok",
                "range": range,
                "start": blocks.start,
                "end": blocks.end,
                "file": cache.range_path(*range)?,
            })
        }
        Commands::Ranges { data_dir } => list_ranges(data_dir)?,
    };

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
