// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A doubly oblivious Path ORAM engine.
//!
//! A [`PathOram`] stores fixed-size blocks of `W` 64-bit words, addressed by
//! [`BlockId`], in a binary tree of buckets. Every [`PathOram::get`], [`PathOram::put`]
//! and [`PathOram::put_partial`] reads and rewrites exactly one root-to-leaf path and
//! performs the same sequence of memory operations regardless of which block is accessed
//! or what it contains. The position map that tracks each block's leaf is itself a
//! `PathOram` once it grows past a configurable threshold, and a linear-scan map below it.
//!
//! ```
//! use path_oram::{PathOram, OramError};
//! use rand::rngs::OsRng;
//!
//! # fn main() -> Result<(), OramError> {
//! let mut rng = OsRng;
//! let mut oram = PathOram::<8>::new(64 * 8, &mut rng)?;
//! let id = oram.allocate_block().expect("capacity available");
//! oram.put(id, &[1, 2, 3, 4, 5, 6, 7, 8], &mut rng)?;
//! let mut out = [0u64; 8];
//! oram.get(id, &mut out, &mut rng)?;
//! assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

use static_assertions::const_assert;
use std::num::TryFromIntError;
use thiserror::Error;

pub mod bucket;
pub mod bucket_store;
pub mod path_oram;
pub mod position_map;
pub mod scan_position_map;
pub mod stash;
pub mod statistics;
pub mod tree_path;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use crate::bucket::{Block, Bucket};
pub use crate::bucket_store::BucketStore;
pub use crate::path_oram::{
    DefaultOram, OramConfig, PathOram, DEFAULT_SCAN_THRESHOLD, DEFAULT_STASH_OVERFLOW_SIZE,
};
pub use crate::position_map::PositionMap;
pub use crate::scan_position_map::ScanPositionMap;
pub use crate::stash::Stash;
pub use crate::statistics::OramStatistics;
pub use crate::tree_path::{InOrderTreeIndex, TreePath};
pub use crate::utils::SortNetwork;

/// The logical identifier of an ORAM block.
pub type BlockId = u64;
/// The numeric type used to specify the width of a block in 64-bit words.
pub type BlockWords = usize;
/// The numeric type used to specify the size of a stash region in blocks.
pub type StashSize = usize;
/// The numeric type used to specify the number of levels of a tree.
pub type TreeHeight = usize;
/// A node id in the in-order encoded bucket tree. Leaves are even, the root is `2^(levels-1) - 1`.
pub type TreeIndex = u64;

/// The parameter "Z" from the Path ORAM literature: the number of blocks per bucket.
pub const BLOCKS_PER_BUCKET: usize = 3;

/// The default block width. With this width an encrypted bucket is exactly [`ENCRYPTED_BUCKET_SIZE`] bytes.
pub const DEFAULT_BLOCK_WORDS: BlockWords = 168;

/// Bytes added to each bucket by the external authenticated encryption layer.
pub const BUCKET_ENCRYPTION_OVERHEAD: usize = 16;

/// The size in bytes of one encrypted bucket with the default block width.
pub const ENCRYPTED_BUCKET_SIZE: usize = 4096;

/// The reserved block id marking an empty slot.
pub const EMPTY_BLOCK_ID: BlockId = u64::MAX;

/// The position paired with [`EMPTY_BLOCK_ID`] in empty slots.
pub const EMPTY_POSITION: TreeIndex = u64::MAX;

const_assert!(BLOCKS_PER_BUCKET >= 2);
const_assert!(
    BLOCKS_PER_BUCKET * (DEFAULT_BLOCK_WORDS + 2) * 8 + BUCKET_ENCRYPTION_OVERHEAD
        == ENCRYPTED_BUCKET_SIZE
);

/// The errors returned by ORAM operations.
///
/// Violated internal invariants (a block id found twice on a path, an out-of-range bucket id)
/// are not represented here; they panic.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum OramError {
    /// Errors arising from conversions between integer types.
    #[error("Arithmetic error encountered.")]
    IntegerConversionError(#[from] TryFromIntError),
    /// The ORAM parameters are inconsistent or out of range.
    #[error("Invalid configuration.")]
    InvalidConfigurationError,
    /// The accessed block id has not been handed out by an allocation call.
    #[error("Attempted to access a block that has not been allocated.")]
    AccessUnallocatedBlockError,
    /// A position map entry was requested outside of the map's capacity.
    #[error("Address out of bounds.")]
    AddressOutOfBoundsError,
    /// A partial write window is empty or extends past the end of the block.
    #[error("Partial write of {len} words at offset {start} does not fit in a block of {block_words} words.")]
    PartialWriteRangeError {
        /// First word of the window.
        start: usize,
        /// Number of words in the window.
        len: usize,
        /// Width of the block.
        block_words: BlockWords,
    },
    /// A caller-supplied buffer does not have the length the operation requires.
    #[error("Buffer has length {actual}, expected {expected}.")]
    BufferLengthError {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },
}
