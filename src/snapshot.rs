//! Snapshot strategy
//!
//! One row per account and per (account, slot), updated in place under the
//! "keep the higher block" rule. Expiry lookups are point reads.

use crate::keys::{encode_account_key, encode_storage_key, META_LAST_INDEXED_RANGE};
use crate::records::{decode_block, decode_range, encode_block, encode_range, AccountAccess};
use crate::reduce::BatchUpdate;
use crate::store::{check_next_range, LastAccessStore};
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};
use std::path::Path;
use tracing::debug;

const CF_ACCOUNTS: &str = "accounts";
const CF_STORAGE: &str = "storage";
const CF_META: &str = "meta";

/// RocksDB-backed snapshot implementation of LastAccessStore.
///
/// Uses column families to organize different types of data:
/// - accounts: address -> AccountAccess (postcard)
/// - storage: (address, slot) -> last-access block (8 bytes, BE)
/// - meta: watermark
pub struct SnapshotStore {
    db: DB,
}

impl SnapshotStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_STORAGE, Options::default()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open snapshot database")?;

        Ok(Self { db })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    fn read_account(&self, key: &[u8]) -> Result<Option<AccountAccess>> {
        let cf = self.get_cf(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, key).context("Failed to get account")? {
            Some(bytes) => {
                let record = postcard::from_bytes(&bytes)
                    .context("Failed to deserialize account record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn read_storage(&self, key: &[u8]) -> Result<Option<u64>> {
        let cf = self.get_cf(CF_STORAGE)?;
        match self.db.get_cf(cf, key).context("Failed to get storage")? {
            Some(bytes) => Ok(Some(decode_block(&bytes).context("Failed to decode storage block")?)),
            None => Ok(None),
        }
    }
}

impl LastAccessStore for SnapshotStore {
    fn last_indexed_range(&self) -> Result<u64> {
        let cf = self.get_cf(CF_META)?;
        match self
            .db
            .get_cf(cf, META_LAST_INDEXED_RANGE)
            .context("Failed to get last indexed range")?
        {
            Some(bytes) => decode_range(&bytes),
            None => Ok(0),
        }
    }

    fn apply_batch(&self, update: &BatchUpdate, range: u64) -> Result<()> {
        check_next_range(self.last_indexed_range()?, range)?;

        let cf_accounts = self.get_cf(CF_ACCOUNTS)?;
        let cf_storage = self.get_cf(CF_STORAGE)?;
        let cf_meta = self.get_cf(CF_META)?;
        let mut batch = WriteBatch::default();
        let mut written = 0usize;

        for (addr, &block) in &update.accounts {
            let is_contract = update.contracts.get(addr).copied().unwrap_or(false);
            let key = encode_account_key(*addr);
            let next = match self.read_account(&key)? {
                Some(current) => {
                    let next = current.merged(block, is_contract);
                    if next == current {
                        continue;
                    }
                    next
                }
                None => AccountAccess { last_access_block: block, is_contract },
            };
            let value = postcard::to_allocvec(&next).context("Failed to serialize account record")?;
            batch.put_cf(cf_accounts, &key, &value);
            written += 1;
        }

        // A contract seen only through storage upgrades an existing record
        // without moving its block.
        for (addr, &is_contract) in &update.contracts {
            if !is_contract || update.accounts.contains_key(addr) {
                continue;
            }
            let key = encode_account_key(*addr);
            if let Some(current) = self.read_account(&key)? {
                if !current.is_contract {
                    let next = AccountAccess { is_contract: true, ..current };
                    let value =
                        postcard::to_allocvec(&next).context("Failed to serialize account record")?;
                    batch.put_cf(cf_accounts, &key, &value);
                    written += 1;
                }
            }
        }

        for (&(addr, slot), &block) in &update.storage {
            let key = encode_storage_key(addr, slot);
            if let Some(current) = self.read_storage(&key)? {
                if block <= current {
                    continue;
                }
            }
            batch.put_cf(cf_storage, &key, encode_block(block));
            written += 1;
        }

        batch.put_cf(cf_meta, META_LAST_INDEXED_RANGE, encode_range(range));
        self.db
            .write(batch)
            .with_context(|| format!("Failed to apply batch for range {}", range))?;

        debug!(range, written, "Applied snapshot batch");
        Ok(())
    }

    fn account_access(&self, addr: Address) -> Result<Option<AccountAccess>> {
        self.read_account(&encode_account_key(addr))
    }

    fn storage_access(&self, addr: Address, slot: B256) -> Result<Option<u64>> {
        self.read_storage(&encode_storage_key(addr, slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use tempfile::TempDir;

    fn create_test_store() -> (SnapshotStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_contract_flag_is_sticky() {
        let (store, _temp_dir) = create_test_store();
        let addr = address!("0000000000000000000000000000000000000001");

        let mut first = BatchUpdate::default();
        first.touch_account(addr, 10, true);
        store.apply_batch(&first, 1).unwrap();

        let mut second = BatchUpdate::default();
        second.touch_account(addr, 20, false);
        store.apply_batch(&second, 2).unwrap();

        let access = store.account_access(addr).unwrap().unwrap();
        assert_eq!(access, AccountAccess { last_access_block: 20, is_contract: true });
    }

    #[test]
    fn test_storage_only_touch_upgrades_contract_flag() {
        let (store, _temp_dir) = create_test_store();
        let addr = address!("0000000000000000000000000000000000000002");

        let mut first = BatchUpdate::default();
        first.touch_account(addr, 10, false);
        store.apply_batch(&first, 1).unwrap();

        let mut second = BatchUpdate::default();
        second.touch_storage(addr, B256::ZERO, 30);
        second.contracts.insert(addr, true);
        store.apply_batch(&second, 2).unwrap();

        let access = store.account_access(addr).unwrap().unwrap();
        assert_eq!(access, AccountAccess { last_access_block: 10, is_contract: true });
    }

    #[test]
    fn test_watermark_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = SnapshotStore::open(temp_dir.path()).unwrap();
            store.apply_batch(&BatchUpdate::default(), 1).unwrap();
        }
        let store = SnapshotStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.last_indexed_range().unwrap(), 1);

        let cf = store.get_cf(CF_META).unwrap();
        let raw = store.db.get_cf(cf, META_LAST_INDEXED_RANGE).unwrap().unwrap();
        assert_eq!(raw, b"1".to_vec());
    }
}
