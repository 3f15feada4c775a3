//! Record types for last-access data
//!
//! These structs represent the data stored in the last-access stores.
//! They use postcard for binary serialization, which is compact and deterministic.

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Last observed access of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAccess {
    /// Highest block at which the account was touched
    pub last_access_block: u64,
    /// Whether the account was ever observed with code or storage changes
    pub is_contract: bool,
}

impl AccountAccess {
    /// Combine with a newer observation: keep the higher block, and never
    /// downgrade a contract to an EOA.
    pub fn merged(self, block: u64, is_contract: bool) -> Self {
        Self {
            last_access_block: self.last_access_block.max(block),
            is_contract: self.is_contract || is_contract,
        }
    }

    /// Whether the account was last touched before `block`.
    pub fn is_expired_at(&self, block: u64) -> bool {
        self.last_access_block < block
    }
}

/// Indexing progress relative to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_synced: bool,
    pub last_indexed_range: u64,
    /// Last block reflected in the store
    pub end_block: u64,
}

/// Encode a block number as 8 big-endian bytes.
pub fn encode_block(block: u64) -> [u8; 8] {
    block.to_be_bytes()
}

/// Decode an 8-byte big-endian block number.
pub fn decode_block(bytes: &[u8]) -> anyhow::Result<u64> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("Block number must be 8 bytes (u64), got {}", bytes.len()))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Encode a range number as its decimal string.
pub fn encode_range(range: u64) -> Vec<u8> {
    range.to_string().into_bytes()
}

/// Decode a decimal range number.
pub fn decode_range(bytes: &[u8]) -> anyhow::Result<u64> {
    let s = std::str::from_utf8(bytes).context("Range number is not UTF-8")?;
    s.parse()
        .with_context(|| format!("Range number is not a decimal integer: {:?}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merged_is_monotonic_and_sticky() {
        let access = AccountAccess { last_access_block: 100, is_contract: true };
        let merged = access.merged(50, false);
        assert_eq!(merged, access);

        let merged = merged.merged(150, false);
        assert_eq!(merged.last_access_block, 150);
        assert!(merged.is_contract);
    }

    #[test]
    fn test_account_access_postcard() {
        let access = AccountAccess { last_access_block: 42, is_contract: false };
        let bytes = postcard::to_allocvec(&access).unwrap();
        let decoded: AccountAccess = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(access, decoded);
    }

    #[test]
    fn test_expiry() {
        let access = AccountAccess { last_access_block: 50, is_contract: false };
        assert!(access.is_expired_at(100));
        assert!(!access.is_expired_at(50));
    }

    #[test]
    fn test_range_encoding() {
        assert_eq!(encode_range(42), b"42".to_vec());
        assert_eq!(decode_range(b"42").unwrap(), 42);
        assert!(decode_range(b"4x2").is_err());
    }

    #[test]
    fn test_block_encoding() {
        assert_eq!(decode_block(&encode_block(7)).unwrap(), 7);
        assert!(decode_block(&[0u8; 4]).is_err());
    }
}
