//! Log strategy
//!
//! Every touch is appended as an immutable event keyed by entity, block and
//! batch sequence number. Nothing is ever updated in place. The current last
//! access of an entity is its highest-keyed event, found with one reverse
//! seek, so reads see a batch as soon as its write returns.
//!
//! Each applied batch gets the next sequence number; the watermark is the
//! value of the newest watermark event.

use crate::keys::{
    account_event_prefix, decode_account_event_key, decode_storage_event_key,
    decode_watermark_event_key, encode_account_event_key, encode_storage_event_key,
    encode_watermark_event_key, storage_event_prefix,
};
use crate::records::{decode_range, encode_range, AccountAccess};
use crate::reduce::BatchUpdate;
use crate::store::{check_next_range, LastAccessStore};
use alloy_primitives::{Address, B256};
use anyhow::{Context, Result};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use tracing::debug;

const CF_ACCOUNT_EVENTS: &str = "account_events";
const CF_STORAGE_EVENTS: &str = "storage_events";
const CF_WATERMARKS: &str = "watermarks";

/// One appended account touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountEvent {
    pub block: u64,
    pub seq: u64,
    pub is_contract: bool,
}

/// One appended storage touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEvent {
    pub block: u64,
    pub seq: u64,
}

/// Newest watermark event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Watermark {
    seq: u64,
    range: u64,
}

/// RocksDB-backed append-only implementation of LastAccessStore.
///
/// Column families:
/// - account_events: 'a' + address + block + seq -> is_contract (1 byte)
/// - storage_events: 's' + address + slot + block + seq -> empty
/// - watermarks: 'w' + seq -> range number (decimal)
pub struct EventLogStore {
    db: DB,
}

impl EventLogStore {
    /// Open or create a RocksDB database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNT_EVENTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_STORAGE_EVENTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_WATERMARKS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open event log database")?;

        Ok(Self { db })
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    fn latest_watermark(&self) -> Result<Option<Watermark>> {
        let cf = self.get_cf(CF_WATERMARKS)?;
        let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, value) = item.context("Failed to read watermark iterator")?;
                let seq = decode_watermark_event_key(&key).context("Invalid watermark key")?;
                let range = decode_range(&value).context("Invalid watermark value")?;
                Ok(Some(Watermark { seq, range }))
            }
            None => Ok(None),
        }
    }

    /// Highest-keyed entry under `prefix`, if any.
    fn last_with_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Option<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.get_cf(cf_name)?;
        let mut upper = prefix.to_vec();
        upper.extend_from_slice(&[0xff; 16]);
        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, value) = item.context("Failed to read event iterator")?;
                if key.starts_with(prefix) {
                    Ok(Some((key, value)))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    /// Every entry under `prefix`, in key order.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.get_cf(cf_name)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.context("Failed to read event iterator")?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// Full touch history of an account, oldest block first.
    pub fn account_history(&self, addr: Address) -> Result<Vec<AccountEvent>> {
        self.scan_prefix(CF_ACCOUNT_EVENTS, &account_event_prefix(addr))?
            .into_iter()
            .map(|(key, value)| decode_account_event(&key, &value))
            .collect()
    }

    /// Full touch history of a storage slot, oldest block first.
    pub fn storage_history(&self, addr: Address, slot: B256) -> Result<Vec<StorageEvent>> {
        self.scan_prefix(CF_STORAGE_EVENTS, &storage_event_prefix(addr, slot))?
            .into_iter()
            .map(|(key, _)| {
                let (_, _, block, seq) =
                    decode_storage_event_key(&key).context("Invalid storage event key")?;
                Ok(StorageEvent { block, seq })
            })
            .collect()
    }
}

fn decode_account_event(key: &[u8], value: &[u8]) -> Result<AccountEvent> {
    let (_, block, seq) = decode_account_event_key(key).context("Invalid account event key")?;
    let is_contract = match value {
        [0] => false,
        [1] => true,
        _ => anyhow::bail!("Invalid account event value: {:?}", value),
    };
    Ok(AccountEvent { block, seq, is_contract })
}

impl LastAccessStore for EventLogStore {
    fn last_indexed_range(&self) -> Result<u64> {
        Ok(self.latest_watermark()?.map_or(0, |w| w.range))
    }

    fn apply_batch(&self, update: &BatchUpdate, range: u64) -> Result<()> {
        let watermark = self.latest_watermark()?;
        check_next_range(watermark.map_or(0, |w| w.range), range)?;
        let seq = watermark.map_or(1, |w| w.seq + 1);

        let cf_accounts = self.get_cf(CF_ACCOUNT_EVENTS)?;
        let cf_storage = self.get_cf(CF_STORAGE_EVENTS)?;
        let cf_watermarks = self.get_cf(CF_WATERMARKS)?;
        let mut batch = WriteBatch::default();

        for (addr, &block) in &update.accounts {
            let is_contract = update.contracts.get(addr).copied().unwrap_or(false);
            batch.put_cf(
                cf_accounts,
                encode_account_event_key(*addr, block, seq),
                [is_contract as u8],
            );
        }
        for (&(addr, slot), &block) in &update.storage {
            batch.put_cf(cf_storage, encode_storage_event_key(addr, slot, block, seq), b"");
        }
        batch.put_cf(cf_watermarks, encode_watermark_event_key(seq), encode_range(range));

        self.db
            .write(batch)
            .with_context(|| format!("Failed to append batch for range {}", range))?;

        debug!(
            range,
            seq,
            accounts = update.accounts.len(),
            slots = update.storage.len(),
            "Appended event batch"
        );
        Ok(())
    }

    fn account_access(&self, addr: Address) -> Result<Option<AccountAccess>> {
        match self.last_with_prefix(CF_ACCOUNT_EVENTS, &account_event_prefix(addr))? {
            Some((key, value)) => {
                let event = decode_account_event(&key, &value)?;
                Ok(Some(AccountAccess {
                    last_access_block: event.block,
                    is_contract: event.is_contract,
                }))
            }
            None => Ok(None),
        }
    }

    fn storage_access(&self, addr: Address, slot: B256) -> Result<Option<u64>> {
        match self.last_with_prefix(CF_STORAGE_EVENTS, &storage_event_prefix(addr, slot))? {
            Some((key, _)) => {
                let (_, _, block, _) =
                    decode_storage_event_key(&key).context("Invalid storage event key")?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use tempfile::TempDir;

    fn create_test_store() -> (EventLogStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = EventLogStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_history_is_preserved() {
        let (store, _temp_dir) = create_test_store();
        let addr = address!("0000000000000000000000000000000000000001");

        for (range, block) in [(1u64, 5u64), (2, 15), (3, 12)] {
            let mut update = BatchUpdate::default();
            update.touch_account(addr, block, range == 2);
            update.touch_storage(addr, B256::ZERO, block);
            store.apply_batch(&update, range).unwrap();
        }

        let history = store.account_history(addr).unwrap();
        let blocks: Vec<u64> = history.iter().map(|e| e.block).collect();
        assert_eq!(blocks, vec![5, 12, 15]);
        assert_eq!(history[2], AccountEvent { block: 15, seq: 2, is_contract: true });

        let current = store.account_access(addr).unwrap().unwrap();
        assert_eq!(current, AccountAccess { last_access_block: 15, is_contract: true });

        let slot_history = store.storage_history(addr, B256::ZERO).unwrap();
        assert_eq!(slot_history.len(), 3);
        assert_eq!(store.storage_access(addr, B256::ZERO).unwrap(), Some(15));
    }

    #[test]
    fn test_contract_flag_follows_max_block() {
        let (store, _temp_dir) = create_test_store();
        let addr = address!("0000000000000000000000000000000000000002");

        let mut first = BatchUpdate::default();
        first.touch_account(addr, 20, false);
        store.apply_batch(&first, 1).unwrap();

        let mut second = BatchUpdate::default();
        second.touch_account(addr, 20, true);
        store.apply_batch(&second, 2).unwrap();

        // Same block twice: the newer event wins.
        assert!(store.account_access(addr).unwrap().unwrap().is_contract);
        assert_eq!(store.account_history(addr).unwrap().len(), 2);
    }

    #[test]
    fn test_prefix_isolation() {
        let (store, _temp_dir) = create_test_store();
        let low = address!("0000000000000000000000000000000000000001");
        let high = address!("0000000000000000000000000000000000000003");
        let middle = address!("0000000000000000000000000000000000000002");

        let mut update = BatchUpdate::default();
        update.touch_account(low, 7, false);
        update.touch_account(high, 9, false);
        store.apply_batch(&update, 1).unwrap();

        assert_eq!(store.account_access(middle).unwrap(), None);
        assert!(store.account_history(middle).unwrap().is_empty());
        assert_eq!(store.account_access(low).unwrap().unwrap().last_access_block, 7);
    }

    #[test]
    fn test_watermark_reads_latest_event_immediately() {
        let (store, _temp_dir) = create_test_store();
        for range in 1..=3 {
            store.apply_batch(&BatchUpdate::default(), range).unwrap();
            assert_eq!(store.last_indexed_range().unwrap(), range);
        }
        let watermark = store.latest_watermark().unwrap().unwrap();
        assert_eq!(watermark, Watermark { seq: 3, range: 3 });
    }
}
