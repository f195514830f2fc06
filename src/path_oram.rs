// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! An implementation of Path ORAM.

use crate::{
    bucket::{encrypted_bucket_size, Block},
    bucket_store::BucketStore,
    position_map::PositionMap,
    stash::Stash,
    statistics::OramStatistics,
    tree_path::TreePath,
    utils::{ceil_log2, ct_in_range, SortNetwork},
    BlockId, BlockWords, OramError, StashSize, TreeHeight, DEFAULT_BLOCK_WORDS,
};
use rand::{CryptoRng, Rng, RngCore};
use subtle::ConditionallySelectable;

/// The default number of overflow blocks that the Path ORAM stash (and recursive stashes) can store
/// before growing.
pub const DEFAULT_STASH_OVERFLOW_SIZE: StashSize = 40;

/// The default size in entries at or below which a position map is scanned linearly
/// instead of being stored in a recursive ORAM.
pub const DEFAULT_SCAN_THRESHOLD: u64 = 1 << 14;

/// The smallest and largest accepted ratios of blocks to leaves for
/// [`PathOram::new_for_available_memory`].
const LOAD_FACTOR_RANGE: std::ops::RangeInclusive<f64> = 1.0..=3.0;

/// Tuning parameters shared by an ORAM and the ORAMs backing its position map.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OramConfig {
    /// The initial number of overflow slots of each stash.
    pub overflow_size: StashSize,
    /// Position maps with at most this many entries are scanned linearly.
    pub scan_threshold: u64,
    /// The comparator network used for eviction.
    pub sort_network: SortNetwork,
}

impl Default for OramConfig {
    fn default() -> Self {
        Self {
            overflow_size: DEFAULT_STASH_OVERFLOW_SIZE,
            scan_threshold: DEFAULT_SCAN_THRESHOLD,
            sort_network: SortNetwork::default(),
        }
    }
}

/// A doubly oblivious Path ORAM storing blocks of `W` words.
///
/// ## Parameters
///
/// - Block width `W`: the number of 64-bit words per block. The recursive position map
///     stores `W` positions per block.
/// - Bucket size: fixed at [`BLOCKS_PER_BUCKET`](crate::BLOCKS_PER_BUCKET).
/// - Overflow size: the number of blocks the stash holds between accesses without growing.
/// - Scan threshold: position maps at or below this size are linear scans.
///
/// ## Security
///
/// Every access reads and writes exactly one root-to-leaf path, chosen uniformly at random and
/// independently of the block accessed, and the stash is evicted with a comparator network
/// whose schedule depends only on the stash size. Two things are visible to an observer:
/// the number of blocks in the stash overflow region, which bounds the eviction sort, and
/// the growth of that region when it is full. With three blocks per bucket and 40 overflow
/// slots growth is rare, and it is never reported as an error.
#[derive(Debug)]
pub struct PathOram<const W: BlockWords> {
    /// The untrusted memory that the ORAM is obliviously accessing on behalf of its client.
    bucket_store: BucketStore<W>,
    position_map: PositionMap<W>,
    stash: Stash<W>,
    /// Scratch path, retargeted on every access.
    path: TreePath,
    capacity_blocks: u64,
    allocated_ub: u64,
    statistics: OramStatistics,
}

/// A `PathOram` whose encrypted buckets are exactly [`ENCRYPTED_BUCKET_SIZE`](crate::ENCRYPTED_BUCKET_SIZE) bytes.
pub type DefaultOram = PathOram<DEFAULT_BLOCK_WORDS>;

impl<const W: BlockWords> PathOram<W> {
    /// Returns an ORAM able to hold `capacity_words` words, with default parameters.
    ///
    /// # Errors
    ///
    /// If `capacity_words` is 0, returns an `InvalidConfigurationError`.
    pub fn new<R: RngCore + CryptoRng>(
        capacity_words: u64,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        Self::new_with_config(capacity_words, &OramConfig::default(), rng)
    }

    /// Returns an ORAM able to hold `capacity_words` words, that is `ceil(capacity_words / W)` blocks.
    ///
    /// # Errors
    ///
    /// If `capacity_words` is 0 or `config` is invalid, returns an `InvalidConfigurationError`.
    pub fn new_with_config<R: RngCore + CryptoRng>(
        capacity_words: u64,
        config: &OramConfig,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        if capacity_words == 0 || W == 0 {
            return Err(OramError::InvalidConfigurationError);
        }
        let num_blocks = capacity_words.div_ceil(W as u64);
        Self::with_geometry(Self::levels_for_blocks(num_blocks), num_blocks, config, rng)
    }

    /// Returns the largest ORAM that fits in `available_bytes` with `load_factor` blocks per leaf.
    ///
    /// The tree gets one bucket per [`encrypted_bucket_size`] bytes, rounded down to a complete
    /// tree; then levels are removed until the whole structure, as measured by
    /// [`PathOram::size_bytes`], fits.
    ///
    /// # Errors
    ///
    /// If `load_factor` is outside `[1.0, 3.0]` or not even a one-level tree fits,
    /// returns an `InvalidConfigurationError`.
    pub fn new_for_available_memory<R: RngCore + CryptoRng>(
        available_bytes: u64,
        load_factor: f64,
        config: &OramConfig,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        if !LOAD_FACTOR_RANGE.contains(&load_factor) || W == 0 {
            return Err(OramError::InvalidConfigurationError);
        }

        let num_buckets = available_bytes / encrypted_bucket_size::<W>() as u64;
        if num_buckets == 0 {
            return Err(OramError::InvalidConfigurationError);
        }
        let mut num_levels = (num_buckets + 1).ilog2() as TreeHeight;
        let blocks_for_levels =
            |num_levels: TreeHeight| ((1u64 << (num_levels - 1)) as f64 * load_factor) as u64;
        let mut num_blocks = blocks_for_levels(num_levels);

        while Self::size_bytes(num_levels, num_blocks, config) > available_bytes {
            if num_levels == 1 {
                return Err(OramError::InvalidConfigurationError);
            }
            num_levels -= 1;
            num_blocks = blocks_for_levels(num_levels);
        }

        Self::with_geometry(num_levels, num_blocks, config, rng)
    }

    /// The number of tree levels used for `num_blocks` blocks.
    pub fn levels_for_blocks(num_blocks: u64) -> TreeHeight {
        (ceil_log2(num_blocks) as TreeHeight).max(1)
    }

    /// The number of bytes an ORAM with these dimensions occupies: its encrypted buckets,
    /// its position map, its stash and its path.
    pub fn size_bytes(num_levels: TreeHeight, num_blocks: u64, config: &OramConfig) -> u64 {
        let path_size = (num_levels * std::mem::size_of::<u64>()) as u64;
        std::mem::size_of::<Self>() as u64
            + BucketStore::<W>::size_bytes(num_levels)
            + PositionMap::<W>::size_bytes(num_blocks, config)
            + Stash::<W>::size_bytes(num_levels, config.overflow_size)
            + path_size
    }

    fn with_geometry<R: RngCore + CryptoRng>(
        num_levels: TreeHeight,
        num_blocks: u64,
        config: &OramConfig,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        if num_blocks == 0 || config.scan_threshold == 0 {
            return Err(OramError::InvalidConfigurationError);
        }

        let bucket_store = BucketStore::new(num_levels)?;
        let position_map =
            PositionMap::create(num_blocks, bucket_store.num_leaves(), config, rng)?;
        let stash = Stash::new(num_levels, config.overflow_size, config.sort_network);
        let path = TreePath::new(0, bucket_store.root());
        let statistics = OramStatistics::new(position_map.recursion_depth());

        log::info!(
            "PathOram::new(W = {}, capacity = {} blocks, levels = {}, leaves = {}, recursion depth = {})",
            W,
            num_blocks,
            num_levels,
            bucket_store.num_leaves(),
            statistics.recursion_depth,
        );

        Ok(Self {
            bucket_store,
            position_map,
            stash,
            path,
            capacity_blocks: num_blocks,
            allocated_ub: 0,
            statistics,
        })
    }

    /// Empties the ORAM: every bucket and the stash, the allocation state and the statistics.
    /// Position map entries keep their current, uniformly random, values.
    pub fn clear(&mut self) {
        log::info!("PathOram::clear(capacity = {} blocks)", self.capacity_blocks);
        self.bucket_store.clear();
        self.stash.clear();
        self.allocated_ub = 0;
        self.statistics.reset();
    }

    /// Reserves the next block id, or returns `None` if every id has been handed out.
    pub fn allocate_block(&mut self) -> Option<BlockId> {
        self.allocate_contiguous(1)
    }

    /// Reserves `n` consecutive block ids and returns the first, or returns `None` without
    /// reserving anything if fewer than `n` ids remain.
    pub fn allocate_contiguous(&mut self, n: u64) -> Option<BlockId> {
        let first = self.allocated_ub;
        let end = first.checked_add(n)?;
        if end > self.capacity_blocks {
            return None;
        }
        self.allocated_ub = end;
        Some(first)
    }

    /// Obliviously reads block `block_id` into `out`.
    pub fn get<R: RngCore + CryptoRng>(
        &mut self,
        block_id: BlockId,
        out: &mut [u64; W],
        rng: &mut R,
    ) -> Result<(), OramError> {
        self.access(
            block_id,
            |data| {
                *out = *data;
                Ok(())
            },
            rng,
        )
    }

    /// Obliviously overwrites block `block_id` with `data`.
    pub fn put<R: RngCore + CryptoRng>(
        &mut self,
        block_id: BlockId,
        data: &[u64; W],
        rng: &mut R,
    ) -> Result<(), OramError> {
        self.access(
            block_id,
            |block| {
                *block = *data;
                Ok(())
            },
            rng,
        )
    }

    /// Obliviously overwrites words `[start, start + data.len())` of block `block_id` with `data`,
    /// first copying their previous contents into `previous` if given.
    ///
    /// Every word of the block is read and conditionally written, so `start` may be secret.
    ///
    /// # Errors
    ///
    /// Returns a `PartialWriteRangeError` if `data` is empty or the window extends past the end
    /// of the block, and a `BufferLengthError` if `previous` is not as long as `data`.
    pub fn put_partial<R: RngCore + CryptoRng>(
        &mut self,
        block_id: BlockId,
        start: usize,
        data: &[u64],
        previous: Option<&mut [u64]>,
        rng: &mut R,
    ) -> Result<(), OramError> {
        let len = data.len();
        if len == 0 || start.checked_add(len).map_or(true, |end| end > W) {
            return Err(OramError::PartialWriteRangeError {
                start,
                len,
                block_words: W,
            });
        }
        if let Some(previous) = &previous {
            if previous.len() != len {
                return Err(OramError::BufferLengthError {
                    expected: len,
                    actual: previous.len(),
                });
            }
        }

        self.access(
            block_id,
            |block| {
                write_window(block, start, data, previous);
                Ok(())
            },
            rng,
        )
    }

    /// Obliviously runs `accessor` on the contents of block `block_id`.
    ///
    /// A block that was never written holds all ones. The block is returned to the stash
    /// whether or not `accessor` succeeds; an error from `accessor` is returned after the
    /// access completes, with any changes it made kept.
    ///
    /// # Errors
    ///
    /// If `block_id` has not been allocated, returns an `AccessUnallocatedBlockError`
    /// without touching any state.
    pub fn access<R: RngCore + CryptoRng, F: FnOnce(&mut [u64; W]) -> Result<(), OramError>>(
        &mut self,
        block_id: BlockId,
        accessor: F,
        rng: &mut R,
    ) -> Result<(), OramError> {
        // Not oblivious: the allocation bound is public.
        if block_id >= self.allocated_ub {
            return Err(OramError::AccessUnallocatedBlockError);
        }

        let new_leaf = rng.gen_range(0..self.bucket_store.num_leaves());
        let previous_leaf = self
            .position_map
            .read_then_set(block_id, new_leaf, rng)?;
        self.path.update(2 * previous_leaf);

        let mut target = Block::empty();
        for (level, node) in self.path.nodes().iter().enumerate() {
            let bucket = self.bucket_store.read_bucket(*node);
            self.stash
                .add_path_bucket(level, &bucket, block_id, &mut target);
        }
        self.stash.scan_overflow_for_target(block_id, &mut target);

        target.id = block_id;
        target.position = 2 * new_leaf;
        let accessor_result = accessor(&mut target.data);
        self.stash.add_block(&target);

        self.stash.build_path(&self.path);
        for (level, node) in self.path.nodes().iter().enumerate() {
            self.bucket_store
                .write_bucket(*node, &self.stash.path_bucket(level));
        }

        self.statistics
            .record_access(self.stash.num_overflow_blocks());
        accessor_result
    }

    /// The statistics of this ORAM, with the `posmap_*` fields taken from its position map ORAM.
    pub fn report_statistics(&self) -> OramStatistics {
        let mut result = self.statistics;
        result.mirror_position_map(self.position_map.oram_statistics().as_ref());
        result
    }

    /// The number of words per block.
    pub fn block_words(&self) -> BlockWords {
        W
    }

    /// The number of blocks that can be allocated.
    pub fn capacity_blocks(&self) -> u64 {
        self.capacity_blocks
    }

    /// The number of bytes of the encrypted bucket store.
    pub fn capacity_bytes(&self) -> u64 {
        self.bucket_store.capacity_bytes()
    }

    /// The number of tree levels.
    pub fn num_levels(&self) -> TreeHeight {
        self.bucket_store.num_levels()
    }

    /// The number of tree leaves.
    pub fn num_leaves(&self) -> u64 {
        self.bucket_store.num_leaves()
    }

    /// One past the highest block id handed out so far.
    pub fn allocated_ub(&self) -> u64 {
        self.allocated_ub
    }

    /// The number of ORAM layers below this one, counting the scan position map at the bottom.
    pub fn recursion_depth(&self) -> usize {
        self.position_map.recursion_depth()
    }

    /// The bucket store, for inspecting its physical access counters.
    pub fn bucket_store(&self) -> &BucketStore<W> {
        &self.bucket_store
    }

    #[cfg(test)]
    pub(crate) fn stash(&self) -> &Stash<W> {
        &self.stash
    }
}

/// Copies `data` into `block[start..start + data.len()]`, and the words it replaces into
/// `previous`, reading and conditionally writing every word of `block`.
///
/// Word `i` of the block pairs with word `(i - start) mod len` of `data`, computed without
/// underflow, so only in-bounds words of `data` are ever read.
fn write_window<const W: BlockWords>(
    block: &mut [u64; W],
    start: usize,
    data: &[u64],
    mut previous: Option<&mut [u64]>,
) {
    let len = data.len();
    let first = start as u64;
    let last = (start + len - 1) as u64;
    for (i, word) in block.iter_mut().enumerate() {
        let source = (i + len - start % len) % len;
        let in_window = ct_in_range(&(i as u64), &first, &last);
        if let Some(previous) = previous.as_mut() {
            previous[source].conditional_assign(word, in_window);
        }
        word.conditional_assign(&data[source], in_window);
    }
}
