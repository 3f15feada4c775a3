//! Main ingestion loop
//!
//! Orchestrates the path from node to store for each range:
//! download (or reuse) the cached range file, decode and reduce its diffs,
//! then apply the reduced batch and advance the watermark.
//!
//! Downloads for a window of upcoming ranges run concurrently; applying is
//! strictly sequential, one range at a time, in range order.

use crate::cache::RangeCache;
use crate::records::SyncStatus;
use crate::reduce::{reduce_blocks, DecodePolicy};
use crate::rpc::TraceSource;
use crate::store::LastAccessStore;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Indexer that keeps a last-access store in step with the chain.
pub struct Indexer<S> {
    cache: RangeCache<S>,
    store: Box<dyn LastAccessStore>,
    policy: DecodePolicy,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<S: TraceSource> Indexer<S> {
    /// Create a new indexer.
    pub fn new(
        cache: RangeCache<S>,
        store: Box<dyn LastAccessStore>,
        policy: DecodePolicy,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            store,
            policy,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub fn store(&self) -> &dyn LastAccessStore {
        self.store.as_ref()
    }

    /// Newest range lying entirely below the node's head block.
    pub async fn latest_known_range(&self) -> Result<u64> {
        let head = self
            .cache
            .source()
            .latest_block_number()
            .await
            .context("Failed to get latest block number")?;
        Ok(self.cache.spec().range_number(head))
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        let latest = self.latest_known_range().await?;
        self.store.sync_status(latest, self.cache.spec().size())
    }

    /// Download every missing range in `first..=last`, several at a time.
    pub async fn prefetch(&self, first: u64, last: u64) -> Result<()> {
        stream::iter(first..=last)
            .map(|n| self.cache.ensure_range_exists(n, &self.cancel))
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await
            .with_context(|| format!("Failed to download ranges {}..={}", first, last))?;
        Ok(())
    }

    /// Reduce range `n` from its cache file and apply it to the store.
    pub async fn index_range(&self, n: u64) -> Result<()> {
        self.cache
            .ensure_range_exists(n, &self.cancel)
            .await
            .with_context(|| format!("Failed to download range {}", n))?;
        let blocks = self
            .cache
            .read_range(n)
            .await
            .with_context(|| format!("Failed to read range {}", n))?;

        let update = reduce_blocks(&blocks, self.policy)
            .with_context(|| format!("Failed to decode range {}", n))?;
        if update.skipped > 0 {
            warn!(range = n, skipped = update.skipped, "Skipped malformed diff entries");
        }

        self.store
            .apply_batch(&update, n)
            .with_context(|| format!("Failed to apply range {}", n))?;

        info!(
            range = n,
            accounts = update.accounts.len(),
            slots = update.storage.len(),
            "Indexed range"
        );
        Ok(())
    }

    /// Index every range between the watermark and the chain head.
    ///
    /// Returns the number of ranges applied. Cancellation stops before the
    /// next range is applied and is not an error.
    pub async fn catch_up(&self) -> Result<u64> {
        let last = self
            .store
            .last_indexed_range()
            .context("Failed to get last indexed range")?;
        let latest = self.latest_known_range().await?;

        if last >= latest {
            info!("Up to date. Last indexed range: {}, latest: {}", last, latest);
            return Ok(0);
        }
        info!("New ranges available: indexed={}, latest={}", last, latest);

        let mut applied = 0;
        let mut next = last + 1;
        while next <= latest {
            if self.cancel.is_cancelled() {
                break;
            }
            let window_end = latest.min(next.saturating_add(self.concurrency as u64 - 1));
            if let Err(err) = self.prefetch(next, window_end).await {
                if self.cancel.is_cancelled() {
                    info!("Download of ranges {}..={} cancelled", next, window_end);
                    break;
                }
                return Err(err);
            }
            for n in next..=window_end {
                if self.cancel.is_cancelled() {
                    break;
                }
                self.index_range(n).await?;
                applied += 1;
            }
            next = window_end + 1;
        }
        Ok(applied)
    }

    /// Run the indexer until cancelled, polling the node every `poll_interval`.
    pub async fn run(&self, poll_interval: Duration) -> Result<()> {
        info!("Starting indexer loop...");

        loop {
            self.catch_up().await.context("Failed to index pending ranges")?;

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Indexer cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::RangeSpec;
    use crate::store::{open_store, Backend};
    use crate::test_utils::{ScriptedSource, CONTRACT, EOA};
    use crate::types::parse_address;
    use alloy_primitives::B256;
    use tempfile::TempDir;

    fn create_test_indexer(
        backend: Backend,
        source: ScriptedSource,
        policy: DecodePolicy,
    ) -> (Indexer<ScriptedSource>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = RangeCache::new(temp_dir.path().join("ranges"), RangeSpec::new(4).unwrap(), source);
        let store = open_store(backend, &temp_dir.path().join("db")).unwrap();
        let indexer = Indexer::new(cache, store, policy, 2, CancellationToken::new());
        (indexer, temp_dir)
    }

    #[tokio::test]
    async fn test_catch_up_indexes_complete_ranges() {
        for backend in [Backend::Snapshot, Backend::Log] {
            // Head 10 with range size 4: ranges 1 (1..=4) and 2 (5..=8) are complete.
            let (indexer, _temp_dir) =
                create_test_indexer(backend, ScriptedSource::new(10), DecodePolicy::Strict);

            assert_eq!(indexer.catch_up().await.unwrap(), 2);
            assert_eq!(indexer.store().last_indexed_range().unwrap(), 2);
            assert_eq!(indexer.cache.source().fetch_count(), 8);

            let eoa = parse_address(EOA).unwrap();
            let contract = parse_address(CONTRACT).unwrap();
            let access = indexer.store().account_access(eoa).unwrap().unwrap();
            assert_eq!(access.last_access_block, 8);
            assert!(!access.is_contract);

            // Storage-only contract: slots are tracked, the account is not.
            assert_eq!(indexer.store().account_access(contract).unwrap(), None);
            let slot0 = B256::ZERO;
            let slot1 = B256::with_last_byte(1);
            assert_eq!(indexer.store().storage_access(contract, slot0).unwrap(), Some(8));
            assert_eq!(indexer.store().storage_access(contract, slot1).unwrap(), Some(6));

            let status = indexer.sync_status().await.unwrap();
            assert!(status.is_synced);
            assert_eq!(status.end_block, 8);

            // Nothing new: no further fetches.
            assert_eq!(indexer.catch_up().await.unwrap(), 0);
            assert_eq!(indexer.cache.source().fetch_count(), 8);
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_watermark() {
        let mut source = ScriptedSource::failing_at(6);
        source.latest = 10;
        let (indexer, _temp_dir) = create_test_indexer(Backend::Snapshot, source, DecodePolicy::Strict);

        assert!(indexer.catch_up().await.is_err());
        assert!(indexer.store().last_indexed_range().unwrap() < 2);
        assert!(!indexer.cache.range_exists(2));
    }

    #[tokio::test]
    async fn test_cancelled_indexer_applies_nothing() {
        let (indexer, _temp_dir) =
            create_test_indexer(Backend::Log, ScriptedSource::new(10), DecodePolicy::Lenient);
        indexer.cancel.cancel();

        assert_eq!(indexer.catch_up().await.unwrap(), 0);
        assert_eq!(indexer.store().last_indexed_range().unwrap(), 0);
        indexer.run(Duration::from_millis(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_download_is_clean_stop() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let source = ScriptedSource::new(10).cancelling_at(6, cancel.clone());
        let cache = RangeCache::new(temp_dir.path().join("ranges"), RangeSpec::new(4).unwrap(), source);
        let store = open_store(Backend::Snapshot, &temp_dir.path().join("db")).unwrap();
        let indexer = Indexer::new(cache, store, DecodePolicy::Strict, 2, cancel);

        assert_eq!(indexer.catch_up().await.unwrap(), 0);
        assert_eq!(indexer.store().last_indexed_range().unwrap(), 0);
        assert!(!indexer.cache.range_exists(2));

        indexer.run(Duration::from_secs(60)).await.unwrap();
    }
}
