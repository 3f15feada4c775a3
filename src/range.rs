//! Block range arithmetic
//!
//! Blocks are grouped into fixed-size ranges that form the unit of download,
//! caching and indexing. Range 0 is reserved for genesis. For `n >= 1`:
//!
//! ```text
//! start = (n - 1) * size + 1
//! end   = start + size - 1
//! ```
//!
//! Each non-genesis range is cached on disk as `{start}_{end}.json.zst`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Suffix of every cached range file.
pub const RANGE_FILE_SUFFIX: &str = ".json.zst";

/// Inclusive span of blocks covered by a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub number: u64,
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    /// Whether this is the genesis range (number 0, block 0 only).
    pub fn is_genesis(&self) -> bool {
        self.number == 0
    }

    /// Iterate over every block in the range.
    pub fn blocks(&self) -> std::ops::RangeInclusive<u64> {
        self.start..=self.end
    }

    /// Cache file name for this range.
    pub fn file_name(&self) -> String {
        format!("{}_{}{}", self.start, self.end, RANGE_FILE_SUFFIX)
    }
}

/// Fixed range size shared by the cache and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    size: u64,
}

impl RangeSpec {
    /// Create a range spec. Returns `None` for a zero size.
    pub fn new(size: u64) -> Option<Self> {
        (size > 0).then_some(Self { size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Block bounds of range `n`. Range 0 is genesis and covers block 0 only.
    ///
    /// Returns `None` if the range does not fit in `u64` block numbers.
    pub fn range(&self, n: u64) -> Option<BlockRange> {
        if n == 0 {
            return Some(BlockRange { number: 0, start: 0, end: 0 });
        }
        let start = (n - 1).checked_mul(self.size)?.checked_add(1)?;
        let end = start.checked_add(self.size - 1)?;
        Some(BlockRange { number: n, start, end })
    }

    /// Highest range lying entirely below `block`.
    ///
    /// `(block - 1) / size` for `block >= 1`, `0` for block 0. Applied to the
    /// chain head this yields the newest range that is safe to index.
    pub fn range_number(&self, block: u64) -> u64 {
        if block == 0 {
            0
        } else {
            (block - 1) / self.size
        }
    }

    /// Last block covered once `range` has been indexed.
    pub fn end_block(&self, range: u64) -> u64 {
        range.saturating_mul(self.size)
    }
}

/// Parse a cache file name into its `(start, end)` bounds.
///
/// Returns `None` for anything that does not look like `{start}_{end}.json.zst`
/// with `start <= end`.
pub fn parse_range_file_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_suffix(RANGE_FILE_SUFFIX)?;
    let (start, end) = stem.split_once('_')?;
    if start.is_empty() || end.is_empty() {
        return None;
    }
    if !start.bytes().all(|b| b.is_ascii_digit()) || !end.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    (start <= end).then_some((start, end))
}

/// Discover cached range files in `dir`.
///
/// Every matching file is expanded into one entry per block it contains.
/// Files whose names don't match the range pattern are ignored.
pub fn scan_range_files(dir: &Path) -> std::io::Result<BTreeMap<u64, PathBuf>> {
    let mut blocks = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some((start, end)) = name.to_str().and_then(parse_range_file_name) else {
            continue;
        };
        let path = entry.path();
        for block in start..=end {
            blocks.insert(block, path.clone());
        }
    }
    Ok(blocks)
}
