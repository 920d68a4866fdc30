//! Bundle shard allocation
//!
//! Each asset class fills numbered shards (`textures-1`, `textures-2`, ...)
//! up to a byte threshold. The threshold is checked after an asset has been
//! placed: the asset stays where it was written and only the next asset of
//! the class moves to the new shard. An asset's bytes are never split.

use crate::class::AssetClass;
use std::collections::BTreeMap;

/// Default byte threshold per shard (10 MiB)
pub const DEFAULT_SPLIT_SIZE: u64 = 10 * 1024 * 1024;

/// Folder name of a shard, e.g. `textures-2`
#[must_use]
pub fn shard_folder(class: AssetClass, shard: u32) -> String {
    format!("{}-{}", class.folder(), shard)
}

/// Fill state of one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardState {
    index: u32,
    bytes_accumulated: u64,
    files_per_shard: BTreeMap<u32, usize>,
}

impl Default for ShardState {
    fn default() -> Self {
        Self {
            index: 1,
            bytes_accumulated: 0,
            files_per_shard: BTreeMap::new(),
        }
    }
}

impl ShardState {
    /// Shard the next asset of the class goes to
    #[inline]
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Bytes placed in the current shard so far
    #[inline]
    #[must_use]
    pub fn bytes_accumulated(&self) -> u64 {
        self.bytes_accumulated
    }

    /// Files currently accounted to `shard`
    #[must_use]
    pub fn files_in(&self, shard: u32) -> usize {
        self.files_per_shard.get(&shard).copied().unwrap_or(0)
    }

    fn roll_over(&mut self) {
        self.index += 1;
        self.bytes_accumulated = 0;
    }
}

/// Per-class report totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassTotals {
    /// Files copied for the class
    pub files: usize,
    /// Bytes on disk after transcoding
    pub bytes: u64,
}

/// Where an asset should be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSlot {
    /// Class of the asset being placed
    pub class: AssetClass,
    /// Shard index, starting at 1
    pub shard: u32,
}

impl ShardSlot {
    /// Shard folder inside the working directory
    #[must_use]
    pub fn folder(&self) -> String {
        shard_folder(self.class, self.shard)
    }
}

/// Result of committing an asset to a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Shard the asset was written to
    pub shard: u32,
    /// The shard filled up and the next asset goes to `shard + 1`
    pub rolled_over: bool,
}

/// Per-class shard counters and byte accumulators
#[derive(Debug, Clone)]
pub struct BundleAllocator {
    split_size: u64,
    states: [ShardState; 4],
    totals: [ClassTotals; 4],
}

impl Default for BundleAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_SPLIT_SIZE)
    }
}

impl BundleAllocator {
    /// Create an allocator. A zero threshold falls back to the default.
    #[must_use]
    pub fn new(split_size: u64) -> Self {
        Self {
            split_size: if split_size == 0 { DEFAULT_SPLIT_SIZE } else { split_size },
            states: Default::default(),
            totals: [ClassTotals::default(); 4],
        }
    }

    /// Byte threshold per shard
    #[inline]
    #[must_use]
    pub fn split_size(&self) -> u64 {
        self.split_size
    }

    /// Fill state of `class`
    #[inline]
    #[must_use]
    pub fn state(&self, class: AssetClass) -> &ShardState {
        &self.states[class.index()]
    }

    /// Current shard index of `class`
    #[inline]
    #[must_use]
    pub fn current_shard(&self, class: AssetClass) -> u32 {
        self.states[class.index()].index
    }

    /// Shard the next asset of `class` goes to
    #[must_use]
    pub fn destination_for(&self, class: AssetClass) -> ShardSlot {
        ShardSlot {
            class,
            shard: self.current_shard(class),
        }
    }

    /// Account for an asset written to `shard`.
    pub fn commit(&mut self, class: AssetClass, shard: u32, bytes: u64) -> Placement {
        let split_size = self.split_size;
        let totals = &mut self.totals[class.index()];
        totals.files += 1;
        totals.bytes += bytes;

        let state = &mut self.states[class.index()];
        *state.files_per_shard.entry(shard).or_insert(0) += 1;

        let mut rolled_over = false;
        if shard == state.index {
            state.bytes_accumulated += bytes;
            if state.bytes_accumulated > split_size {
                tracing::debug!(
                    class = %class,
                    shard,
                    bytes = state.bytes_accumulated,
                    "shard full, rolling over"
                );
                state.roll_over();
                rolled_over = true;
            }
        }
        Placement { shard, rolled_over }
    }

    /// Reflect a size change of an already placed asset, e.g. after
    /// transcoding. Only the current shard's accumulator is touched.
    /// Returns `true` if the change filled the shard.
    pub fn adjust(&mut self, class: AssetClass, shard: u32, before: u64, after: u64) -> bool {
        let split_size = self.split_size;
        let totals = &mut self.totals[class.index()];
        totals.bytes = totals.bytes.saturating_sub(before) + after;

        let state = &mut self.states[class.index()];
        if shard != state.index {
            return false;
        }
        state.bytes_accumulated = state.bytes_accumulated.saturating_sub(before) + after;
        if state.bytes_accumulated > split_size {
            state.roll_over();
            return true;
        }
        false
    }

    /// Take back an asset accounted with [`commit`](Self::commit) whose file
    /// was removed from `shard`. A rollover it caused is not undone.
    pub fn uncommit(&mut self, class: AssetClass, shard: u32, bytes: u64) {
        let totals = &mut self.totals[class.index()];
        totals.files = totals.files.saturating_sub(1);
        totals.bytes = totals.bytes.saturating_sub(bytes);

        let state = &mut self.states[class.index()];
        if let Some(files) = state.files_per_shard.get_mut(&shard) {
            *files = files.saturating_sub(1);
        }
        if shard == state.index {
            state.bytes_accumulated = state.bytes_accumulated.saturating_sub(bytes);
        }
    }

    /// Shards of `class` that received at least one file, ascending
    #[must_use]
    pub fn shards_with_files(&self, class: AssetClass) -> Vec<u32> {
        self.states[class.index()]
            .files_per_shard
            .iter()
            .filter(|(_, files)| **files > 0)
            .map(|(shard, _)| *shard)
            .collect()
    }

    /// Report totals of `class`
    #[inline]
    #[must_use]
    pub fn totals(&self, class: AssetClass) -> ClassTotals {
        self.totals[class.index()]
    }

    /// Reset every counter for a new run
    pub fn reset(&mut self) {
        *self = Self::new(self.split_size);
    }
}
