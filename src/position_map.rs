// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A recursive Path ORAM position map data structure.

use crate::{
    path_oram::{OramConfig, PathOram},
    scan_position_map::ScanPositionMap,
    statistics::OramStatistics,
    BlockId, BlockWords, OramError,
};
use log::debug;
use rand::{CryptoRng, Rng, RngCore};
use subtle::{ConditionallySelectable, ConstantTimeEq};

/// Maps each block id in `[0, capacity)` to the leaf its block is routed to.
///
/// Maps with at most [`OramConfig::scan_threshold`] entries are scanned linearly. Larger maps
/// pack `W` entries per block into a `PathOram` of their own, whose position map is in turn
/// chosen the same way.
#[derive(Debug)]
pub enum PositionMap<const W: BlockWords> {
    /// A linear-scan map.
    Scan(ScanPositionMap),
    /// A map whose entries live in an ORAM.
    Recursive {
        /// The ORAM holding the entries.
        oram: Box<PathOram<W>>,
        /// The block holding entries `0..W`; entry `i` is word `i % W` of block `base_block_id + i / W`.
        base_block_id: BlockId,
        /// The number of entries.
        size: u64,
    },
}

impl<const W: BlockWords> PositionMap<W> {
    /// Returns a map of `size` entries, each drawn uniformly from `[0, num_positions)`.
    pub fn create<R: RngCore + CryptoRng>(
        size: u64,
        num_positions: u64,
        config: &OramConfig,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        if num_positions == 0 || W == 0 {
            return Err(OramError::InvalidConfigurationError);
        }

        if size <= config.scan_threshold {
            debug!("PositionMap::create -- scan (C = {})", size);
            return Ok(Self::Scan(ScanPositionMap::new(size, num_positions, rng)?));
        }

        // With fewer than two entries per block the recursion would not shrink.
        if W < 2 {
            return Err(OramError::InvalidConfigurationError);
        }
        debug!("PositionMap::create -- recursive (C = {}, W = {})", size, W);
        let mut oram = PathOram::<W>::new_with_config(size, config, rng)?;
        let blocks_needed = size.div_ceil(W as u64);
        let base_block_id = oram
            .allocate_contiguous(blocks_needed)
            .ok_or(OramError::InvalidConfigurationError)?;

        for block_id in base_block_id..base_block_id + blocks_needed {
            let mut positions = [0u64; W];
            for position in positions.iter_mut() {
                *position = rng.gen_range(0..num_positions);
            }
            oram.put(block_id, &positions, rng)?;
        }

        Ok(Self::Recursive {
            oram: Box::new(oram),
            base_block_id,
            size,
        })
    }

    /// The number of bytes a map of `size` entries occupies.
    pub fn size_bytes(size: u64, config: &OramConfig) -> u64 {
        if size <= config.scan_threshold || W < 2 {
            ScanPositionMap::size_bytes(size)
        } else {
            let num_blocks = size.div_ceil(W as u64);
            PathOram::<W>::size_bytes(PathOram::<W>::levels_for_blocks(num_blocks), num_blocks, config)
        }
    }

    /// The number of entries.
    pub fn capacity(&self) -> u64 {
        match self {
            PositionMap::Scan(map) => map.capacity(),
            PositionMap::Recursive { size, .. } => *size,
        }
    }

    /// The number of ORAM layers, counting the scan map at the bottom as one.
    pub fn recursion_depth(&self) -> usize {
        match self {
            PositionMap::Scan(_) => 1,
            PositionMap::Recursive { oram, .. } => 1 + oram.recursion_depth(),
        }
    }

    /// The statistics of the backing ORAM, if there is one.
    pub fn oram_statistics(&self) -> Option<OramStatistics> {
        match self {
            PositionMap::Scan(_) => None,
            PositionMap::Recursive { oram, .. } => Some(oram.report_statistics()),
        }
    }

    // Splits an entry index into the ORAM block holding it and its word within that block.
    fn locate(&self, block_id: BlockId) -> Result<(BlockId, u64), OramError> {
        if block_id >= self.capacity() {
            return Err(OramError::AddressOutOfBoundsError);
        }
        let width = W as u64;
        Ok((block_id / width, block_id % width))
    }

    /// Returns the position of `block_id`.
    pub fn get<R: RngCore + CryptoRng>(
        &mut self,
        block_id: BlockId,
        rng: &mut R,
    ) -> Result<u64, OramError> {
        let (block_offset, index_within_block) = self.locate(block_id)?;

        match self {
            PositionMap::Scan(map) => map.get(block_id),

            PositionMap::Recursive {
                oram,
                base_block_id,
                ..
            } => {
                let mut entries = [0u64; W];
                oram.get(*base_block_id + block_offset, &mut entries, rng)?;

                let mut result = 0u64;
                for (i, entry) in entries.iter().enumerate() {
                    let index_matches = (i as u64).ct_eq(&index_within_block);
                    result.conditional_assign(entry, index_matches);
                }
                Ok(result)
            }
        }
    }

    /// Sets the position of `block_id` to `new_position` and returns its previous position.
    pub fn read_then_set<R: RngCore + CryptoRng>(
        &mut self,
        block_id: BlockId,
        new_position: u64,
        rng: &mut R,
    ) -> Result<u64, OramError> {
        let (block_offset, index_within_block) = self.locate(block_id)?;

        match self {
            PositionMap::Scan(map) => map.read_then_set(block_id, new_position),

            PositionMap::Recursive {
                oram,
                base_block_id,
                ..
            } => {
                let mut previous = [0u64; 1];
                // The window offset is secret; `put_partial` touches every word regardless.
                oram.put_partial(
                    *base_block_id + block_offset,
                    usize::try_from(index_within_block)?,
                    &[new_position],
                    Some(&mut previous),
                    rng,
                )?;
                Ok(previous[0])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_logger, test_rng};

    fn config_with_threshold(scan_threshold: u64) -> OramConfig {
        OramConfig {
            scan_threshold,
            ..OramConfig::default()
        }
    }

    #[test]
    fn backend_follows_threshold() {
        init_logger();
        let mut rng = test_rng();
        let config = config_with_threshold(16);

        for (size, expected_depth) in [(1, 1), (16, 1), (17, 2), (64, 2), (65, 3)] {
            let map = PositionMap::<4>::create(size, 8, &config, &mut rng).unwrap();
            assert_eq!(map.capacity(), size);
            assert_eq!(map.recursion_depth(), expected_depth, "size {size}");
            assert_eq!(
                map.oram_statistics().is_some(),
                expected_depth > 1,
                "size {size}"
            );
        }
    }

    #[test]
    fn recursive_map_round_trip() {
        init_logger();
        let mut rng = test_rng();
        let config = config_with_threshold(16);
        let num_positions = 32;
        let size = 100;
        let mut map = PositionMap::<4>::create(size, num_positions, &config, &mut rng).unwrap();
        assert_eq!(map.recursion_depth(), 3);

        let mut mirror = Vec::new();
        for id in 0..size {
            let position = map.get(id, &mut rng).unwrap();
            assert!(position < num_positions);
            mirror.push(position);
        }

        for round in 0..3 {
            for id in 0..size {
                let new_position = rng.gen_range(0..num_positions);
                let previous = map.read_then_set(id, new_position, &mut rng).unwrap();
                assert_eq!(previous, mirror[id as usize], "round {round} id {id}");
                mirror[id as usize] = new_position;
            }
        }
        for id in 0..size {
            assert_eq!(map.get(id, &mut rng).unwrap(), mirror[id as usize]);
        }

        let statistics = map.oram_statistics().unwrap();
        assert!(statistics.access_count > 0);
        assert_eq!(statistics.recursion_depth, 2);
    }

    #[test]
    fn one_word_blocks_cannot_recurse() {
        let mut rng = test_rng();
        let config = config_with_threshold(16);
        assert!(PositionMap::<1>::create(16, 8, &config, &mut rng).is_ok());
        assert_eq!(
            PositionMap::<1>::create(17, 8, &config, &mut rng).unwrap_err(),
            OramError::InvalidConfigurationError
        );
    }

    #[test]
    fn out_of_bounds() {
        let mut rng = test_rng();
        let config = config_with_threshold(16);
        for size in [10, 40] {
            let mut map = PositionMap::<4>::create(size, 8, &config, &mut rng).unwrap();
            assert_eq!(
                map.get(size, &mut rng),
                Err(OramError::AddressOutOfBoundsError)
            );
            assert_eq!(
                map.read_then_set(size, 0, &mut rng),
                Err(OramError::AddressOutOfBoundsError)
            );
        }
    }

    #[test]
    fn size_bytes_by_backend() {
        let config = config_with_threshold(16);
        assert_eq!(PositionMap::<4>::size_bytes(16, &config), 16 * 8);
        let num_blocks = 17u64.div_ceil(4);
        assert_eq!(
            PositionMap::<4>::size_bytes(17, &config),
            PathOram::<4>::size_bytes(PathOram::<4>::levels_for_blocks(num_blocks), num_blocks, &config)
        );
    }
}
