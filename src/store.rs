//! LastAccessStore trait
//!
//! Both persistence strategies implement the same contract:
//! - `apply_batch` writes a reduced batch and advances the watermark in one
//!   atomic RocksDB write. Either both move or neither does.
//! - Last-access blocks never decrease, whatever order batches arrive in.
//! - The watermark starts at 0 and moves forward one range at a time.
//!
//! [`SnapshotStore`] keeps one row per entity and updates it in place.
//! [`EventLogStore`] appends every touch and derives the current value when
//! read.

use crate::eventlog::EventLogStore;
use crate::records::{AccountAccess, SyncStatus};
use crate::reduce::BatchUpdate;
use crate::snapshot::SnapshotStore;
use alloy_primitives::{Address, B256};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Trait defining the interface for last-access storage.
///
/// All methods return Results for proper error handling.
/// Entities that were never touched are reported as `None`.
pub trait LastAccessStore: Send + Sync {
    /// Highest range fully applied, or 0 before the first batch.
    fn last_indexed_range(&self) -> Result<u64>;

    /// Apply a reduced batch and advance the watermark to `range`.
    ///
    /// `range` must be exactly one past the current watermark.
    fn apply_batch(&self, update: &BatchUpdate, range: u64) -> Result<()>;

    /// Current last access of an account.
    fn account_access(&self, addr: Address) -> Result<Option<AccountAccess>>;

    /// Current last-access block of a storage slot.
    fn storage_access(&self, addr: Address, slot: B256) -> Result<Option<u64>>;

    /// Compare the watermark against the newest range known to the chain.
    fn sync_status(&self, latest_known_range: u64, range_size: u64) -> Result<SyncStatus> {
        let last_indexed_range = self.last_indexed_range()?;
        Ok(SyncStatus {
            is_synced: last_indexed_range >= latest_known_range,
            last_indexed_range,
            end_block: last_indexed_range.saturating_mul(range_size),
        })
    }

    /// Whether the account was last touched before `block`.
    fn is_account_expired(&self, addr: Address, block: u64) -> Result<Option<bool>> {
        Ok(self.account_access(addr)?.map(|access| access.is_expired_at(block)))
    }

    /// Whether the slot was last touched before `block`.
    fn is_storage_expired(&self, addr: Address, slot: B256, block: u64) -> Result<Option<bool>> {
        Ok(self.storage_access(addr, slot)?.map(|last| last < block))
    }
}

/// Persistence strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One row per entity, updated in place.
    #[default]
    Snapshot,
    /// Append-only touch events.
    Log,
}

/// Open the store for `backend` at `path`.
pub fn open_store(backend: Backend, path: &Path) -> Result<Box<dyn LastAccessStore>> {
    Ok(match backend {
        Backend::Snapshot => Box::new(SnapshotStore::open(path)?),
        Backend::Log => Box::new(EventLogStore::open(path)?),
    })
}

/// Reject watermark moves other than `current + 1`.
pub(crate) fn check_next_range(current: u64, range: u64) -> Result<()> {
    if range != current + 1 {
        anyhow::bail!(
            "Cannot apply range {}: last indexed range is {}, expected {}",
            range,
            current,
            current + 1
        );
    }
    Ok(())
}
