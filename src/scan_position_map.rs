// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A position map that ensures obliviousness by making a complete pass over its entries.

use crate::{BlockId, OramError};
use rand::{CryptoRng, Rng, RngCore};
use subtle::{ConditionallySelectable, ConstantTimeEq};

/// A flat array of positions. Each lookup or update reads and writes every entry.
#[derive(Debug)]
pub struct ScanPositionMap {
    positions: Vec<u64>,
}

impl ScanPositionMap {
    /// Returns a map of `size` entries, each drawn uniformly from `[0, num_positions)`.
    pub fn new<R: RngCore + CryptoRng>(
        size: u64,
        num_positions: u64,
        rng: &mut R,
    ) -> Result<Self, OramError> {
        if num_positions == 0 {
            return Err(OramError::InvalidConfigurationError);
        }
        let positions = (0..size)
            .map(|_| rng.gen_range(0..num_positions))
            .collect();
        Ok(Self { positions })
    }

    /// The number of bytes the map occupies.
    pub fn size_bytes(size: u64) -> u64 {
        size * std::mem::size_of::<u64>() as u64
    }

    /// The number of entries.
    pub fn capacity(&self) -> u64 {
        self.positions.len() as u64
    }

    // Rejecting an out-of-range id only leaks that the id is malformed.
    fn check_bounds(&self, block_id: BlockId) -> Result<(), OramError> {
        if block_id >= self.capacity() {
            return Err(OramError::AddressOutOfBoundsError);
        }
        Ok(())
    }

    /// Returns the position of `block_id`.
    pub fn get(&self, block_id: BlockId) -> Result<u64, OramError> {
        self.check_bounds(block_id)?;

        let mut result = 0;
        for (i, position) in self.positions.iter().enumerate() {
            let is_requested_index = (i as u64).ct_eq(&block_id);
            result.conditional_assign(position, is_requested_index);
        }
        Ok(result)
    }

    /// Sets the position of `block_id` to `new_position` and returns its previous position.
    pub fn read_then_set(
        &mut self,
        block_id: BlockId,
        new_position: u64,
    ) -> Result<u64, OramError> {
        self.check_bounds(block_id)?;

        let mut previous = new_position;
        for (i, position) in self.positions.iter_mut().enumerate() {
            let is_requested_index = (i as u64).ct_eq(&block_id);
            u64::conditional_swap(&mut previous, position, is_requested_index);
        }
        Ok(previous)
    }
}
