//! Expiry indexer - state-expiry ingestion core
//!
//! This library downloads per-block state diffs from an Ethereum node into a
//! range cache, reduces them to the last block each account and storage slot
//! was touched, and persists those blocks in a RocksDB-backed store.

pub mod codec;
pub mod error;
pub mod keys;
pub mod range;
pub mod records;
pub mod types;

// Ingestion
pub mod cache;
pub mod decode;
pub mod reduce;
pub mod rpc;

// Persistence
pub mod eventlog;
pub mod snapshot;
pub mod store;

pub mod cli;
pub mod config;
pub mod indexer;

#[cfg(test)]
mod test_utils;

// Re-export the main types for convenience
pub use cache::RangeCache;
pub use config::IndexerConfig;
pub use indexer::Indexer;
pub use range::{BlockRange, RangeSpec};
pub use records::{AccountAccess, SyncStatus};
pub use reduce::{BatchUpdate, DecodePolicy};
pub use store::{open_store, Backend, LastAccessStore};
