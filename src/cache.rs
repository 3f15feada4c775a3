//! Range cache
//!
//! Materializes block ranges as compressed files on disk so state diffs are
//! fetched from the node at most once.
//!
//! Strategy:
//! - A range file is written in one go, only after every block of the range
//!   was fetched. A failed fetch leaves nothing behind.
//! - A missing or zero-length file means "not downloaded".
//! - Before a file is reused it must pass the codec's validation. A truncated
//!   write from a crash fails it and the range is downloaded again.
//! - `read_range` never repairs anything: a file that fails to decompress or
//!   parse is reported as corrupt.

use crate::codec::{Codec, ZstdCodec};
use crate::error::{CacheError, CacheResult};
use crate::range::{scan_range_files, BlockRange, RangeSpec};
use crate::rpc::TraceSource;
use crate::types::BlockDiffs;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// On-disk cache of per-block state diffs, one file per range.
pub struct RangeCache<S, C = ZstdCodec> {
    data_dir: PathBuf,
    spec: RangeSpec,
    source: S,
    codec: C,
}

impl<S: TraceSource> RangeCache<S> {
    /// Create a cache using the default zstd codec.
    pub fn new(data_dir: impl Into<PathBuf>, spec: RangeSpec, source: S) -> Self {
        Self::with_codec(data_dir, spec, source, ZstdCodec::default())
    }
}

impl<S: TraceSource, C: Codec> RangeCache<S, C> {
    pub fn with_codec(data_dir: impl Into<PathBuf>, spec: RangeSpec, source: S, codec: C) -> Self {
        Self {
            data_dir: data_dir.into(),
            spec,
            source,
            codec,
        }
    }

    pub fn spec(&self) -> RangeSpec {
        self.spec
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn block_range(&self, n: u64) -> CacheResult<BlockRange> {
        self.spec.range(n).ok_or(CacheError::OutOfRange(n))
    }

    /// Path of the cache file for range `n`.
    pub fn range_path(&self, n: u64) -> CacheResult<PathBuf> {
        Ok(self.data_dir.join(self.block_range(n)?.file_name()))
    }

    /// Whether range `n` is present on disk.
    ///
    /// Genesis always exists. Other ranges exist iff their file is present
    /// and non-empty. The content is not inspected; see
    /// [`Self::has_valid_range`].
    pub fn range_exists(&self, n: u64) -> bool {
        if n == 0 {
            return true;
        }
        let Ok(path) = self.range_path(n) else {
            return false;
        };
        std::fs::metadata(path)
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Whether range `n` is present and its file passes codec validation.
    ///
    /// An invalid file is reported as absent and left in place for the next
    /// download to overwrite.
    pub async fn has_valid_range(&self, n: u64) -> CacheResult<bool> {
        if n == 0 {
            return Ok(true);
        }
        let path = self.range_path(n)?;
        let compressed = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        if compressed.is_empty() {
            return Ok(false);
        }
        if let Err(err) = self.codec.validate(&compressed) {
            warn!(range = n, error = %err, "Discarding invalid range file {:?}", path);
            return Ok(false);
        }
        Ok(true)
    }

    /// Fetch every block of range `n` and write the range file.
    ///
    /// No-op if a valid file already exists. Fails without writing anything
    /// if a single block fetch fails or `cancel` fires between two fetches.
    pub async fn download_range(&self, n: u64, cancel: &CancellationToken) -> CacheResult<()> {
        if n == 0 {
            return Err(CacheError::Genesis);
        }
        if self.has_valid_range(n).await? {
            debug!(range = n, "Range already cached");
            return Ok(());
        }
        self.fetch_and_write(n, cancel).await
    }

    /// Download range `n` unless a valid file already exists. No-op for genesis.
    pub async fn ensure_range_exists(&self, n: u64, cancel: &CancellationToken) -> CacheResult<()> {
        if self.has_valid_range(n).await? {
            return Ok(());
        }
        self.fetch_and_write(n, cancel).await
    }

    async fn fetch_and_write(&self, n: u64, cancel: &CancellationToken) -> CacheResult<()> {
        let range = self.block_range(n)?;
        let path = self.range_path(n)?;
        info!(range = n, start = range.start, end = range.end, "Downloading range");

        let mut blocks = Vec::with_capacity(self.spec.size().min(4096) as usize);
        for block in range.blocks() {
            if cancel.is_cancelled() {
                return Err(CacheError::Cancelled(n));
            }
            let diffs = self
                .source
                .state_diff(block)
                .await
                .map_err(|source| CacheError::Fetch { block, source })?;
            blocks.push(BlockDiffs { block_num: block, diffs });
        }

        let payload =
            serde_json::to_vec(&blocks).map_err(|source| CacheError::Encode { range: n, source })?;
        let compressed = self
            .codec
            .compress(&payload)
            .map_err(|source| CacheError::Codec { path: path.clone(), source })?;

        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|source| CacheError::Io { path: self.data_dir.clone(), source })?;
        tokio::fs::write(&path, &compressed)
            .await
            .map_err(|source| CacheError::Io { path: path.clone(), source })?;

        info!(
            range = n,
            raw_bytes = payload.len(),
            compressed_bytes = compressed.len(),
            "Range cached at {:?}",
            path
        );
        Ok(())
    }

    /// Read, decompress and deserialize range `n`.
    ///
    /// Any failure after the file was found is reported as corruption.
    pub async fn read_range(&self, n: u64) -> CacheResult<Vec<BlockDiffs>> {
        if n == 0 {
            return Err(CacheError::Genesis);
        }
        let range = self.block_range(n)?;
        let path = self.range_path(n)?;
        let compressed = tokio::fs::read(&path)
            .await
            .map_err(|source| CacheError::Io { path: path.clone(), source })?;
        if compressed.is_empty() {
            return Err(CacheError::Corrupt {
                path,
                reason: "empty file, range was never fully downloaded".to_string(),
            });
        }

        let payload = self.codec.decompress(&compressed).map_err(|err| CacheError::Corrupt {
            path: path.clone(),
            reason: format!("decompression failed: {}", err),
        })?;
        let blocks: Vec<BlockDiffs> =
            serde_json::from_slice(&payload).map_err(|err| CacheError::Corrupt {
                path: path.clone(),
                reason: format!("invalid JSON: {}", err),
            })?;

        check_coverage(&range, &blocks).map_err(|reason| CacheError::Corrupt {
            path: path.clone(),
            reason,
        })?;
        Ok(blocks)
    }

    /// Map every cached block number to its range file.
    pub fn scan(&self) -> CacheResult<BTreeMap<u64, PathBuf>> {
        if !self.data_dir.exists() {
            return Ok(BTreeMap::new());
        }
        scan_range_files(&self.data_dir)
            .map_err(|source| CacheError::Io { path: self.data_dir.clone(), source })
    }
}

/// A range file must hold exactly the blocks of its range, in order.
fn check_coverage(range: &BlockRange, blocks: &[BlockDiffs]) -> Result<(), String> {
    let expected = range.end - range.start + 1;
    if blocks.len() as u64 != expected {
        return Err(format!("expected {} blocks, found {}", expected, blocks.len()));
    }
    for (block, number) in blocks.iter().zip(range.blocks()) {
        if block.block_num != number {
            return Err(format!("expected block {}, found {}", number, block.block_num));
        }
    }
    Ok(())
}
