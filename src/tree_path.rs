// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Geometry of the in-order encoded bucket tree.
//!
//! A tree with `L` levels has `2^L - 1` nodes numbered `0..2^L - 1` in in-order
//! traversal order. Leaves are the even ids, a node at level `l` (leaves are level 0)
//! is an id whose lowest `l` bits are ones and whose bit `l` is zero, and the root
//! is `2^(L-1) - 1`. The subtree of a level-`l` node `x` covers `[x - (2^l - 1), x + (2^l - 1)]`.

use crate::{TreeHeight, TreeIndex};

/// Operations on node ids of an in-order encoded complete binary tree.
pub trait InOrderTreeIndex
where
    Self: Sized,
{
    /// The level of this node: 0 for leaves, `num_levels - 1` for the root.
    fn tree_level(&self) -> TreeHeight;
    /// The parent of this node, which must be at level `level`.
    fn parent_at_level(&self, level: TreeHeight) -> Self;
    /// The smallest leaf id in the subtree rooted at this node.
    fn lower_bound(&self) -> Self;
    /// The largest id in the subtree rooted at this node. Every leaf below this node
    /// lies in `[lower_bound(), upper_bound()]`.
    fn upper_bound(&self) -> Self;
    /// Whether this node is a leaf.
    fn is_leaf(&self) -> bool;
}

impl InOrderTreeIndex for TreeIndex {
    fn tree_level(&self) -> TreeHeight {
        // `trailing_ones` compiles to a branch-free bit scan.
        self.trailing_ones() as TreeHeight
    }

    fn parent_at_level(&self, level: TreeHeight) -> Self {
        (self | (1 << level)) & !(1 << (level + 1))
    }

    fn lower_bound(&self) -> Self {
        // Clears the trailing ones.
        self & (self + 1)
    }

    fn upper_bound(&self) -> Self {
        // Mirrors the lower bound around this node.
        2 * self - self.lower_bound()
    }

    fn is_leaf(&self) -> bool {
        self & 1 == 0
    }
}

/// The number of nodes in a tree with `num_levels` levels.
pub fn tree_num_nodes(num_levels: TreeHeight) -> u64 {
    (1u64 << num_levels) - 1
}

/// The root of a tree with `num_levels` levels.
pub fn tree_root(num_levels: TreeHeight) -> TreeIndex {
    (1u64 << (num_levels - 1)) - 1
}

/// The node ids on the path from a leaf to the root, leaf first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreePath {
    nodes: Vec<TreeIndex>,
}

impl TreePath {
    /// Returns the path from `leaf` to `root`.
    ///
    /// # Panics
    ///
    /// If `root + 1` is not a power of two or `leaf` is not a leaf below `root`.
    pub fn new(leaf: TreeIndex, root: TreeIndex) -> Self {
        assert!((root + 1).is_power_of_two());
        let length = (root + 1).trailing_zeros() as usize + 1;
        let mut result = Self {
            nodes: vec![0; length],
        };
        result.update(leaf);
        debug_assert_eq!(result.nodes[length - 1], root);
        result
    }

    /// Retargets this path to `leaf` in place.
    ///
    /// The computation depends only on `leaf` and the path length and does not allocate.
    pub fn update(&mut self, leaf: TreeIndex) {
        assert!(leaf.is_leaf());
        let mut node = leaf;
        for (level, slot) in self.nodes.iter_mut().enumerate() {
            *slot = node;
            node = node.parent_at_level(level);
        }
        assert!(leaf <= 2 * self.root());
    }

    /// The node ids on this path, leaf first.
    pub fn nodes(&self) -> &[TreeIndex] {
        &self.nodes
    }

    /// The number of nodes on this path, equal to the number of tree levels.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a path contains at least the root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The leaf this path starts from.
    pub fn leaf(&self) -> TreeIndex {
        self.nodes[0]
    }

    /// The root this path ends at.
    pub fn root(&self) -> TreeIndex {
        self.nodes[self.nodes.len() - 1]
    }
}
