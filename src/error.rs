//! Error types for the ingestion core
//!
//! Decoding and cache errors are typed so callers can tell a malformed entry
//! from a failed fetch or a corrupt file. The store and the binaries use
//! `anyhow` with context instead.

use std::path::PathBuf;
use thiserror::Error;

/// A single state diff entry could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The address key of a diff entry is not a 20-byte hex string.
    #[error("invalid address {0:?}")]
    Address(String),
    /// A storage slot key is not a hex string of at most 32 bytes.
    #[error("invalid storage slot {slot:?} for {address}")]
    Slot { address: String, slot: String },
    /// A diff field has an unexpected JSON shape.
    #[error("malformed {field} diff for {address}: {reason}")]
    Field { address: String, field: &'static str, reason: String },
}

/// Failure to materialize or read a cached range.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Range 0 is never downloaded.
    #[error("genesis range has no cache file")]
    Genesis,
    /// A block fetch failed; the range was not written.
    #[error("failed to fetch state diff for block {block}")]
    Fetch {
        block: u64,
        #[source]
        source: anyhow::Error,
    },
    /// The range's block numbers do not fit in `u64`.
    #[error("range {0} is out of bounds")]
    OutOfRange(u64),
    /// The download was cancelled between two block fetches.
    #[error("download of range {0} cancelled")]
    Cancelled(u64),
    /// The collected diffs could not be serialized.
    #[error("failed to serialize range {range}")]
    Encode {
        range: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("I/O error on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Compression or decompression failed.
    #[error("codec error on {path:?}")]
    Codec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The cache file exists but its content cannot be trusted.
    #[error("corrupt range file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
