// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Stash occupancy statistics, for capacity planning.

use crate::StashSize;

/// The per-access decay of the moving average, `0.5^(1/10000)`: a sample's weight halves
/// after ten thousand accesses.
const EMA_DECAY: f64 = 0.999_930_687_684_153_57;

/// Running statistics of one ORAM, and of the ORAM backing its position map if there is one.
///
/// None of these values depend on which blocks were accessed, only on how many blocks the
/// stash held after each access.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OramStatistics {
    /// The number of accesses since creation or the last clear.
    pub access_count: u64,
    /// The number of blocks in the stash overflow region after the most recent access.
    pub stash_overflow_count: u64,
    /// The largest value `stash_overflow_count` has taken.
    pub max_stash_overflow_count: u64,
    /// The sum of `stash_overflow_count` over all accesses.
    pub sum_stash_overflow_count: u64,
    /// An exponential moving average of `stash_overflow_count` with a half-life of 10000 accesses.
    pub stash_overflow_ema10k: f64,
    /// The number of ORAM layers including this one, down to the scan position map.
    pub recursion_depth: usize,
    /// `stash_overflow_count` of the position map ORAM, 0 for a scan position map.
    pub posmap_stash_overflow_count: u64,
    /// `max_stash_overflow_count` of the position map ORAM, 0 for a scan position map.
    pub posmap_max_stash_overflow_count: u64,
    /// `sum_stash_overflow_count` of the position map ORAM, 0 for a scan position map.
    pub posmap_sum_stash_overflow_count: u64,
    /// `stash_overflow_ema10k` of the position map ORAM, 0 for a scan position map.
    pub posmap_stash_overflow_ema10k: f64,
}

impl OramStatistics {
    pub(crate) fn new(recursion_depth: usize) -> Self {
        Self {
            recursion_depth,
            ..Self::default()
        }
    }

    /// Records the stash occupancy observed after one access.
    pub(crate) fn record_access(&mut self, stash_size: StashSize) {
        let stash_size = stash_size as u64;
        self.access_count += 1;
        self.stash_overflow_count = stash_size;
        self.sum_stash_overflow_count += stash_size;
        self.stash_overflow_ema10k =
            (1.0 - EMA_DECAY) * stash_size as f64 + EMA_DECAY * self.stash_overflow_ema10k;
        self.max_stash_overflow_count = self.max_stash_overflow_count.max(stash_size);
    }

    /// Copies the own-layer statistics of `posmap` into the `posmap_*` fields.
    pub(crate) fn mirror_position_map(&mut self, posmap: Option<&OramStatistics>) {
        let posmap = posmap.copied().unwrap_or_default();
        self.posmap_stash_overflow_count = posmap.stash_overflow_count;
        self.posmap_max_stash_overflow_count = posmap.max_stash_overflow_count;
        self.posmap_sum_stash_overflow_count = posmap.sum_stash_overflow_count;
        self.posmap_stash_overflow_ema10k = posmap.stash_overflow_ema10k;
    }

    /// Forgets all recorded accesses, keeping the recursion depth.
    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.recursion_depth);
    }
}
