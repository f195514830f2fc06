// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The untrusted memory holding the bucket tree.

use crate::{
    bucket::{encrypted_bucket_size, Bucket},
    tree_path::{tree_num_nodes, tree_root},
    BlockWords, OramError, TreeHeight, TreeIndex,
};

/// A flat array of `2^num_levels - 1` buckets indexed by in-order node id.
///
/// Models the memory an adversary observes: every bucket read and write is counted,
/// so that tests can check the physical access pattern of the layers above.
#[derive(Debug)]
pub struct BucketStore<const W: BlockWords> {
    buckets: Vec<Bucket<W>>,
    num_levels: TreeHeight,
    read_count: u64,
    write_count: u64,
}

impl<const W: BlockWords> BucketStore<W> {
    /// Returns a store for a tree with `num_levels` levels, with every slot empty.
    pub fn new(num_levels: TreeHeight) -> Result<Self, OramError> {
        if num_levels == 0 || num_levels >= 64 {
            return Err(OramError::InvalidConfigurationError);
        }
        let num_buckets: usize = tree_num_nodes(num_levels).try_into()?;
        Ok(Self {
            buckets: vec![Bucket::empty(); num_buckets],
            num_levels,
            read_count: 0,
            write_count: 0,
        })
    }

    /// The number of bytes a store with `num_levels` levels occupies once encrypted.
    pub fn size_bytes(num_levels: TreeHeight) -> u64 {
        tree_num_nodes(num_levels) * encrypted_bucket_size::<W>() as u64
    }

    /// Returns a copy of the bucket at `node`.
    ///
    /// # Panics
    ///
    /// If `node` is not a node of this tree.
    pub fn read_bucket(&mut self, node: TreeIndex) -> Bucket<W> {
        let index = self.checked_index(node);
        self.read_count += 1;
        self.buckets[index]
    }

    /// Overwrites the bucket at `node`.
    ///
    /// # Panics
    ///
    /// If `node` is not a node of this tree.
    pub fn write_bucket(&mut self, node: TreeIndex, bucket: &Bucket<W>) {
        let index = self.checked_index(node);
        self.write_count += 1;
        self.buckets[index] = *bucket;
    }

    fn checked_index(&self, node: TreeIndex) -> usize {
        assert!(
            node < tree_num_nodes(self.num_levels),
            "bucket {node} out of range for a tree of {} levels",
            self.num_levels
        );
        // In range of a `Vec` length, so the conversion cannot truncate.
        node as usize
    }

    /// Empties every bucket.
    pub fn clear(&mut self) {
        self.buckets.fill(Bucket::empty());
    }

    /// The number of tree levels.
    pub fn num_levels(&self) -> TreeHeight {
        self.num_levels
    }

    /// The number of leaves, `2^(num_levels - 1)`.
    pub fn num_leaves(&self) -> u64 {
        1 << (self.num_levels - 1)
    }

    /// The node id of the root.
    pub fn root(&self) -> TreeIndex {
        tree_root(self.num_levels)
    }

    /// The number of buckets.
    pub fn num_buckets(&self) -> u64 {
        tree_num_nodes(self.num_levels)
    }

    /// The number of bytes this store occupies once encrypted.
    pub fn capacity_bytes(&self) -> u64 {
        Self::size_bytes(self.num_levels)
    }

    /// The total number of bucket reads since creation.
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    /// The total number of bucket writes since creation.
    pub fn write_count(&self) -> u64 {
        self.write_count
    }

    /// Iterates over every bucket in node id order.
    #[cfg(test)]
    pub(crate) fn buckets(&self) -> impl Iterator<Item = &Bucket<W>> {
        self.buckets.iter()
    }
}
