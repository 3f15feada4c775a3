//! Batch reduction
//!
//! Folds the decoded diffs of many blocks into "latest block per entity"
//! maps. Every update is a max-by-block fold, so the result does not depend on
//! the order in which blocks or transactions are visited.

use crate::decode::decode_account_diff;
use crate::error::DecodeError;
use crate::types::BlockDiffs;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// What to do with an entry that fails to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Abort the whole reduction.
    Strict,
    /// Log a warning, count it, and continue.
    #[default]
    Lenient,
}

/// Reduced update for one or more blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchUpdate {
    /// Highest block at which the account's balance, code or nonce changed.
    pub accounts: HashMap<Address, u64>,
    /// OR of `is_contract` over every touch of the address.
    pub contracts: HashMap<Address, bool>,
    /// Highest block at which the slot changed.
    pub storage: HashMap<(Address, B256), u64>,
    /// Entries dropped under [`DecodePolicy::Lenient`].
    pub skipped: usize,
}

impl BatchUpdate {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.contracts.is_empty() && self.storage.is_empty()
    }

    /// Record an account touch at `block`.
    pub fn touch_account(&mut self, address: Address, block: u64, is_contract: bool) {
        max_into(&mut self.accounts, address, block);
        self.flag_contract(address, is_contract);
    }

    /// Record a storage touch at `block`.
    pub fn touch_storage(&mut self, address: Address, slot: B256, block: u64) {
        max_into(&mut self.storage, (address, slot), block);
    }

    fn flag_contract(&mut self, address: Address, is_contract: bool) {
        let flag = self.contracts.entry(address).or_insert(false);
        *flag |= is_contract;
    }

    /// Combine another partial reduction into this one.
    pub fn merge(&mut self, other: BatchUpdate) {
        for (address, block) in other.accounts {
            max_into(&mut self.accounts, address, block);
        }
        for (address, is_contract) in other.contracts {
            self.flag_contract(address, is_contract);
        }
        for (key, block) in other.storage {
            max_into(&mut self.storage, key, block);
        }
        self.skipped += other.skipped;
    }
}

fn max_into<K: std::hash::Hash + Eq>(map: &mut HashMap<K, u64>, key: K, block: u64) {
    map.entry(key)
        .and_modify(|current| *current = (*current).max(block))
        .or_insert(block);
}

/// Reduce a sequence of blocks into a single [`BatchUpdate`].
///
/// Entries with neither an account nor a storage change are ignored.
pub fn reduce_blocks(blocks: &[BlockDiffs], policy: DecodePolicy) -> Result<BatchUpdate, DecodeError> {
    let mut update = BatchUpdate::default();
    for block in blocks {
        reduce_block(&mut update, block, policy)?;
    }
    Ok(update)
}

/// Fold one block into `update`.
pub fn reduce_block(
    update: &mut BatchUpdate,
    block: &BlockDiffs,
    policy: DecodePolicy,
) -> Result<(), DecodeError> {
    let number = block.block_num;
    for tx in &block.diffs {
        for (address, raw) in &tx.state_diff {
            let mut diff = match decode_account_diff(address, raw) {
                Ok(diff) => diff,
                Err(err) => {
                    skip_or_fail(update, policy, number, err)?;
                    continue;
                }
            };

            for err in std::mem::take(&mut diff.rejected_slots) {
                skip_or_fail(update, policy, number, err)?;
            }

            if !diff.is_touch() {
                continue;
            }
            if diff.account_changed {
                update.touch_account(diff.address, number, diff.is_contract);
            } else {
                // Storage-only touches still carry the contract flag.
                update.flag_contract(diff.address, diff.is_contract);
            }
            for slot in diff.slots {
                update.touch_storage(diff.address, slot, number);
            }
        }
    }
    Ok(())
}

fn skip_or_fail(
    update: &mut BatchUpdate,
    policy: DecodePolicy,
    block: u64,
    err: DecodeError,
) -> Result<(), DecodeError> {
    match policy {
        DecodePolicy::Strict => Err(err),
        DecodePolicy::Lenient => {
            warn!(block, error = %err, "Skipping malformed state diff entry");
            update.skipped += 1;
            Ok(())
        }
    }
}
