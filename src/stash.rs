// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The Path ORAM stash.
//!
//! The stash holds the blocks of the path being accessed (the path region, `Z` slots per level,
//! level 0 first) followed by the blocks that did not fit back into the tree (the overflow region).
//! Eviction assigns each block a level of the current path, pads every level to exactly `Z` blocks
//! with empty blocks, and sorts the stash obliviously so that bucket `l` ends up in path slots
//! `[l * Z, (l + 1) * Z)`.

use crate::{
    bucket::{block_size_bytes, Block, Bucket},
    tree_path::{InOrderTreeIndex, TreePath},
    utils::{ct_in_range, SortNetwork},
    BlockId, BlockWords, StashSize, TreeHeight, BLOCKS_PER_BUCKET,
};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq, ConstantTimeGreater, ConstantTimeLess};

/// The number of overflow slots added each time the overflow region is full.
pub const STASH_GROWTH_INCREMENT: StashSize = 20;

/// The level assignment of a stash slot that stays in the overflow region.
const UNASSIGNED: u64 = u64::MAX;

#[derive(Debug)]
/// An obliviously accessed Path ORAM stash, evicted with an oblivious sort.
pub struct Stash<const W: BlockWords> {
    blocks: Vec<Block<W>>,
    bucket_assignments: Vec<u64>,
    bucket_occupancy: Vec<u64>,
    path_length: TreeHeight,
    sort_network: SortNetwork,
}

impl<const W: BlockWords> Stash<W> {
    /// Returns an empty stash for paths of `path_length` buckets with `overflow_size` overflow slots.
    pub fn new(path_length: TreeHeight, overflow_size: StashSize, sort_network: SortNetwork) -> Self {
        let num_blocks = BLOCKS_PER_BUCKET * path_length + overflow_size;
        Self {
            blocks: vec![Block::empty(); num_blocks],
            bucket_assignments: vec![UNASSIGNED; num_blocks],
            bucket_occupancy: vec![0; path_length],
            path_length,
            sort_network,
        }
    }

    /// The number of bytes a stash with these parameters occupies.
    pub fn size_bytes(path_length: TreeHeight, overflow_size: StashSize) -> u64 {
        let num_blocks = (BLOCKS_PER_BUCKET * path_length + overflow_size) as u64;
        let word = std::mem::size_of::<u64>() as u64;
        num_blocks * block_size_bytes::<W>() as u64 + path_length as u64 * word + num_blocks * word
    }

    fn path_region_len(&self) -> usize {
        BLOCKS_PER_BUCKET * self.path_length
    }

    fn overflow(&self) -> &[Block<W>] {
        &self.blocks[self.path_region_len()..]
    }

    /// The current number of overflow slots.
    pub fn overflow_capacity(&self) -> StashSize {
        self.blocks.len() - self.path_region_len()
    }

    /// The number of real blocks in the overflow region.
    pub fn num_overflow_blocks(&self) -> StashSize {
        self.overflow()
            .iter()
            .map(|block| usize::from((!block.ct_is_empty()).unwrap_u8()))
            .sum()
    }

    /// One past the highest occupied overflow slot.
    ///
    /// Eviction only sorts up to this bound, so its running time reveals the number of blocks in
    /// the stash. That number is published through the statistics anyway.
    pub fn overflow_ub(&self) -> StashSize {
        let mut ub = 0u64;
        for (i, block) in self.overflow().iter().enumerate() {
            ub.conditional_assign(&(i as u64 + 1), !block.ct_is_empty());
        }
        // Bounded by the overflow capacity.
        ub as StashSize
    }

    /// Copies `bucket`, read from level `level` of the current path, into the path region. If it
    /// holds the block `target_id`, that block is moved into `target`, which must be empty.
    pub fn add_path_bucket(
        &mut self,
        level: TreeHeight,
        bucket: &Bucket<W>,
        target_id: BlockId,
        target: &mut Block<W>,
    ) {
        assert!(level < self.path_length);
        let start = level * BLOCKS_PER_BUCKET;
        let slots = &mut self.blocks[start..start + BLOCKS_PER_BUCKET];
        for (slot, incoming) in slots.iter_mut().zip(bucket.blocks.iter()) {
            *slot = *incoming;
            extract_if_target(slot, target_id, target);
        }
    }

    /// Moves the block `target_id` from the overflow region into `target` if it is there.
    pub fn scan_overflow_for_target(&mut self, target_id: BlockId, target: &mut Block<W>) {
        let start = self.path_region_len();
        let ub = self.overflow_ub();
        for slot in self.blocks[start..start + ub].iter_mut() {
            extract_if_target(slot, target_id, target);
        }
    }

    /// Inserts `block` into the first empty overflow slot, growing the overflow region if every
    /// slot is taken.
    pub fn add_block(&mut self, block: &Block<W>) {
        let start = self.path_region_len();
        loop {
            let mut inserted = Choice::from(0);
            for slot in self.blocks[start..].iter_mut() {
                let insert_here = slot.ct_is_empty() & !inserted;
                slot.conditional_assign(block, insert_here);
                inserted |= insert_here;
            }
            if inserted.into() {
                return;
            }
            self.grow();
        }
    }

    fn grow(&mut self) {
        let new_len = self.blocks.len() + STASH_GROWTH_INCREMENT;
        log::debug!(
            "Stash overflow region full, growing to {} slots",
            new_len - self.path_region_len()
        );
        self.blocks.resize(new_len, Block::empty());
        self.bucket_assignments.resize(new_len, UNASSIGNED);
    }

    /// Assigns every real block in the first `len` slots to the lowest level of `path` it may be
    /// stored at that still has room.
    ///
    /// A block read from level `l` is only considered for levels `0..=l`, so it can always at least
    /// return to the bucket it came from. Overflow blocks are considered for every level.
    fn assign_buckets(&mut self, path: &TreePath, len: usize) {
        let path_region_len = self.path_region_len();
        let z = BLOCKS_PER_BUCKET as u64;
        self.bucket_occupancy.fill(0);
        self.bucket_assignments.fill(UNASSIGNED);

        for (slot, block) in self.blocks[..len].iter().enumerate() {
            let max_level = if slot < path_region_len {
                slot / BLOCKS_PER_BUCKET + 1
            } else {
                self.path_length
            };
            let is_real = !block.ct_is_empty();
            let mut assigned = Choice::from(0);

            for (level, node) in path.nodes().iter().enumerate().take(max_level) {
                let in_subtree =
                    ct_in_range(&block.position, &node.lower_bound(), &node.upper_bound());
                let has_room = self.bucket_occupancy[level].ct_lt(&z);
                let assign_here = in_subtree & has_room & !assigned & is_real;

                let incremented = self.bucket_occupancy[level] + 1;
                self.bucket_occupancy[level].conditional_assign(&incremented, assign_here);
                self.bucket_assignments[slot].conditional_assign(&(level as u64), assign_here);
                assigned |= assign_here;
            }
        }
    }

    /// Assigns empty blocks among the first `len` slots to levels that are not yet full, until every
    /// level holds exactly `Z` blocks.
    fn place_empty_blocks(&mut self, len: usize) {
        let z = BLOCKS_PER_BUCKET as u64;
        for slot in 0..len {
            let is_empty = self.blocks[slot].ct_is_empty();
            let mut assigned = Choice::from(0);
            for level in 0..self.path_length {
                let has_room = self.bucket_occupancy[level].ct_lt(&z);
                let assign_here = is_empty & has_room & !assigned;

                let incremented = self.bucket_occupancy[level] + 1;
                self.bucket_occupancy[level].conditional_assign(&incremented, assign_here);
                self.bucket_assignments[slot].conditional_assign(&(level as u64), assign_here);
                assigned |= assign_here;
            }
        }
        debug_assert!(self
            .bucket_occupancy
            .iter()
            .all(|&occupancy| occupancy == z));
    }

    /// Prepares the buckets of `path` for write-back. Afterwards [`Stash::path_bucket`] returns
    /// the bucket for each level, and blocks that did not fit remain in the overflow region.
    pub fn build_path(&mut self, path: &TreePath) {
        assert_eq!(path.len(), self.path_length);
        let len = self.path_region_len() + self.overflow_ub();

        self.assign_buckets(path, len);
        self.place_empty_blocks(len);

        self.sort_network.sort_by(
            &mut self.blocks[..len],
            &mut self.bucket_assignments[..len],
            |a, a_level, b, b_level| {
                a_level.ct_gt(b_level)
                    | (a_level.ct_eq(b_level) & a.position.ct_gt(&b.position))
            },
        );
    }

    /// The bucket assigned to `level` by the last [`Stash::build_path`].
    pub fn path_bucket(&self, level: TreeHeight) -> Bucket<W> {
        assert!(level < self.path_length);
        let start = level * BLOCKS_PER_BUCKET;
        Bucket {
            blocks: std::array::from_fn(|i| self.blocks[start + i]),
        }
    }

    /// Empties every slot. The overflow region keeps its current capacity.
    pub fn clear(&mut self) {
        self.blocks.fill(Block::empty());
        self.bucket_assignments.fill(UNASSIGNED);
        self.bucket_occupancy.fill(0);
    }

    /// The real blocks held in the overflow region.
    #[cfg(test)]
    pub(crate) fn overflow_blocks(&self) -> impl Iterator<Item = &Block<W>> {
        self.overflow().iter().filter(|block| !bool::from(block.ct_is_empty()))
    }
}

/// Swaps `slot` into `target` if `slot` holds the block `target_id`.
fn extract_if_target<const W: BlockWords>(
    slot: &mut Block<W>,
    target_id: BlockId,
    target: &mut Block<W>,
) {
    let found = slot.id.ct_eq(&target_id);
    assert!(
        !bool::from(found & !target.ct_is_empty()),
        "block found in more than one slot"
    );
    Block::conditional_swap(target, slot, found);
}
