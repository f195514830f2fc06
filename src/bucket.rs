// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Block and bucket structures for Path ORAM.

use crate::{
    BlockId, BlockWords, TreeIndex, BLOCKS_PER_BUCKET, BUCKET_ENCRYPTION_OVERHEAD, EMPTY_BLOCK_ID,
    EMPTY_POSITION,
};
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};

/// The size in bytes of the plaintext of one block of `W` words: its id, its position and its data.
pub const fn block_size_bytes<const W: BlockWords>() -> usize {
    (W + 2) * std::mem::size_of::<u64>()
}

/// The size in bytes of one bucket of `W`-word blocks once encrypted by the storage layer.
pub const fn encrypted_bucket_size<const W: BlockWords>() -> usize {
    BLOCKS_PER_BUCKET * block_size_bytes::<W>() + BUCKET_ENCRYPTION_OVERHEAD
}

#[derive(Clone, Copy, PartialEq, Eq)]
/// A Path ORAM block: `W` words of data together with the block's id and its position in the tree.
pub struct Block<const W: BlockWords> {
    /// The logical id of this block, or [`EMPTY_BLOCK_ID`] if the slot holding it is empty.
    pub id: BlockId,
    /// The leaf node id this block is routed to, or [`EMPTY_POSITION`] if empty.
    pub position: TreeIndex,
    /// The block contents.
    pub data: [u64; W],
}

impl<const W: BlockWords> Block<W> {
    /// An empty block. Every bit is set, so a block that was never written reads back as all ones.
    pub fn empty() -> Self {
        Self {
            id: EMPTY_BLOCK_ID,
            position: EMPTY_POSITION,
            data: [u64::MAX; W],
        }
    }

    /// Whether this block is empty, in constant time.
    pub fn ct_is_empty(&self) -> Choice {
        self.id.ct_eq(&EMPTY_BLOCK_ID)
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.id == EMPTY_BLOCK_ID
    }
}

impl<const W: BlockWords> Default for Block<W> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const W: BlockWords> std::fmt::Debug for Block<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.ct_is_empty().into() {
            write!(f, "Block::Empty")
        } else {
            f.debug_struct("Block")
                .field("id", &self.id)
                .field("position", &self.position)
                .field("data", &self.data)
                .finish()
        }
    }
}

impl<const W: BlockWords> ConditionallySelectable for Block<W> {
    fn conditional_select(a: &Self, b: &Self, choice: Choice) -> Self {
        let mut result = *a;
        result.conditional_assign(b, choice);
        result
    }

    fn conditional_assign(&mut self, other: &Self, choice: Choice) {
        self.id.conditional_assign(&other.id, choice);
        self.position.conditional_assign(&other.position, choice);
        for (word, other_word) in self.data.iter_mut().zip(other.data.iter()) {
            word.conditional_assign(other_word, choice);
        }
    }

    fn conditional_swap(a: &mut Self, b: &mut Self, choice: Choice) {
        u64::conditional_swap(&mut a.id, &mut b.id, choice);
        u64::conditional_swap(&mut a.position, &mut b.position, choice);
        for (a_word, b_word) in a.data.iter_mut().zip(b.data.iter_mut()) {
            u64::conditional_swap(a_word, b_word, choice);
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
/// A Path ORAM bucket: the [`BLOCKS_PER_BUCKET`] blocks stored at one tree node.
pub struct Bucket<const W: BlockWords> {
    /// The blocks stored by this bucket. Empty slots hold [`Block::empty`].
    pub blocks: [Block<W>; BLOCKS_PER_BUCKET],
}

impl<const W: BlockWords> Bucket<W> {
    /// A bucket all of whose slots are empty.
    pub fn empty() -> Self {
        Self {
            blocks: [Block::empty(); BLOCKS_PER_BUCKET],
        }
    }
}

impl<const W: BlockWords> Default for Bucket<W> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const W: BlockWords> std::fmt::Debug for Bucket<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let self_is_empty = self.blocks.iter().all(|block| block.ct_is_empty().into());

        if self_is_empty {
            write!(f, "Bucket::Empty")
        } else {
            f.debug_struct("Bucket")
                .field("blocks", &self.blocks)
                .finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DEFAULT_BLOCK_WORDS, ENCRYPTED_BUCKET_SIZE};

    fn block(id: BlockId, position: TreeIndex, fill: u64) -> Block<4> {
        Block {
            id,
            position,
            data: [fill; 4],
        }
    }

    #[test]
    fn empty_block_is_all_ones() {
        let empty = Block::<4>::empty();
        assert!(empty.is_empty());
        assert!(bool::from(empty.ct_is_empty()));
        assert_eq!(empty.position, EMPTY_POSITION);
        assert_eq!(empty.data, [u64::MAX; 4]);
        assert!(!block(0, 0, 0).is_empty());
    }

    #[test]
    fn conditional_select_and_swap() {
        let a = block(1, 10, 7);
        let b = block(2, 20, 9);

        assert_eq!(Block::conditional_select(&a, &b, 0.into()), a);
        assert_eq!(Block::conditional_select(&a, &b, 1.into()), b);

        let (mut x, mut y) = (a, b);
        Block::conditional_swap(&mut x, &mut y, 0.into());
        assert_eq!((x, y), (a, b));
        Block::conditional_swap(&mut x, &mut y, 1.into());
        assert_eq!((x, y), (b, a));

        let mut z = a;
        z.conditional_assign(&b, 1.into());
        assert_eq!(z, b);
    }

    #[test]
    fn bucket_sizes() {
        assert_eq!(block_size_bytes::<DEFAULT_BLOCK_WORDS>(), 1360);
        assert_eq!(
            encrypted_bucket_size::<DEFAULT_BLOCK_WORDS>(),
            ENCRYPTED_BUCKET_SIZE
        );
        assert_eq!(encrypted_bucket_size::<6>(), 208);
    }

    #[test]
    fn debug_output() {
        assert_eq!(format!("{:?}", Block::<2>::empty()), "Block::Empty");
        assert_eq!(format!("{:?}", Bucket::<2>::empty()), "Bucket::Empty");
        let mut bucket = Bucket::<4>::empty();
        bucket.blocks[1] = block(3, 4, 5);
        assert!(format!("{bucket:?}").contains("id: 3"));
    }
}
