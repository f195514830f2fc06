// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Common test utilities: logging, seeded randomness, workloads checked against a mirror array,
//! and structural checks of an ORAM's buckets and stash.

use crate::{
    path_oram::{OramConfig, PathOram},
    tree_path::InOrderTreeIndex,
    BlockWords, SortNetwork,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use simplelog::{Config, WriteLogger};
use std::collections::HashSet;
use std::sync::Once;

static INIT: Once = Once::new();

// For use in manual testing and inspection.
pub(crate) fn init_logger() {
    INIT.call_once(|| {
        WriteLogger::init(log::LevelFilter::Info, Config::default(), std::io::stdout()).unwrap()
    })
}

pub(crate) fn test_rng() -> StdRng {
    StdRng::seed_from_u64(0)
}

/// Checks that no block id occurs twice across the buckets and the stash, and that every block
/// in a bucket lies on the path to its position.
pub(crate) fn check_oram_invariants<const W: BlockWords>(oram: &PathOram<W>) {
    let mut seen = HashSet::new();

    for (node, bucket) in oram.bucket_store().buckets().enumerate() {
        let node = node as u64;
        for block in bucket.blocks.iter().filter(|block| !block.is_empty()) {
            assert!(seen.insert(block.id), "block {} stored twice", block.id);
            assert!(
                node.lower_bound() <= block.position && block.position <= node.upper_bound(),
                "block {} with position {} stored off its path at node {}",
                block.id,
                block.position,
                node
            );
        }
    }

    for block in oram.stash().overflow_blocks() {
        assert!(seen.insert(block.id), "block {} stored twice", block.id);
        assert!(block.position < 2 * oram.num_leaves());
    }

    assert!(seen.iter().all(|&id| id < oram.allocated_ub()));
}

fn random_block<const W: BlockWords>(rng: &mut StdRng) -> [u64; W] {
    std::array::from_fn(|_| rng.gen())
}

/// Runs a random mix of reads, writes and partial writes on random blocks of a `PathOram<W>`
/// holding `capacity` blocks, comparing every read against a mirror array.
pub(crate) fn test_correctness_random_workload<const W: BlockWords>(
    capacity: u64,
    num_operations: u32,
    config: OramConfig,
) {
    init_logger();
    let mut rng = test_rng();

    let mut oram = PathOram::<W>::new_with_config(capacity * W as u64, &config, &mut rng).unwrap();
    assert_eq!(oram.allocate_contiguous(capacity), Some(0));
    let mut mirror_array = vec![[u64::MAX; W]; capacity as usize];

    for _ in 0..num_operations {
        let random_index = rng.gen_range(0..capacity);
        let mirror = &mut mirror_array[random_index as usize];

        match rng.gen_range(0..3) {
            0 => {
                let mut out = [0u64; W];
                oram.get(random_index, &mut out, &mut rng).unwrap();
                assert_eq!(out, *mirror);
            }
            1 => {
                let value = random_block::<W>(&mut rng);
                oram.put(random_index, &value, &mut rng).unwrap();
                *mirror = value;
            }
            _ => {
                let start = rng.gen_range(0..W);
                let len = rng.gen_range(1..=W - start);
                let data: Vec<u64> = (0..len).map(|_| rng.gen()).collect();
                let mut previous = vec![0u64; len];
                oram.put_partial(random_index, start, &data, Some(&mut previous), &mut rng)
                    .unwrap();
                assert_eq!(previous, mirror[start..start + len]);
                mirror[start..start + len].copy_from_slice(&data);
            }
        }
    }

    for index in 0..capacity {
        let mut out = [0u64; W];
        oram.get(index, &mut out, &mut rng).unwrap();
        assert_eq!(out, mirror_array[index as usize], "{index}");
    }

    check_oram_invariants(&oram);
    assert_eq!(
        oram.report_statistics().access_count,
        u64::from(num_operations) + capacity
    );
}

/// Runs repeated passes over blocks `0, 1, ..., capacity - 1`, randomly reading or writing each,
/// comparing every read against a mirror array.
pub(crate) fn test_correctness_linear_workload<const W: BlockWords>(
    capacity: u64,
    num_operations: u32,
    config: OramConfig,
) {
    init_logger();
    let mut rng = test_rng();

    let mut oram = PathOram::<W>::new_with_config(capacity * W as u64, &config, &mut rng).unwrap();
    assert_eq!(oram.allocate_contiguous(capacity), Some(0));
    let mut mirror_array = vec![[u64::MAX; W]; capacity as usize];

    let num_passes = u64::from(num_operations) / capacity;

    for _ in 0..num_passes {
        for index in 0..capacity {
            if rng.gen::<bool>() {
                let mut out = [0u64; W];
                oram.get(index, &mut out, &mut rng).unwrap();
                assert_eq!(out, mirror_array[index as usize]);
            } else {
                let value = random_block::<W>(&mut rng);
                oram.put(index, &value, &mut rng).unwrap();
                mirror_array[index as usize] = value;
            }
        }
    }

    for index in 0..capacity {
        let mut out = [0u64; W];
        oram.get(index, &mut out, &mut rng).unwrap();
        assert_eq!(out, mirror_array[index as usize], "{index}");
    }

    check_oram_invariants(&oram);
}

pub(crate) fn config_for(sort_network: SortNetwork, scan_threshold: u64) -> OramConfig {
    OramConfig {
        scan_threshold,
        sort_network,
        ..OramConfig::default()
    }
}

macro_rules! create_path_oram_correctness_test {
    ($function_name:ident, $sort_network:ident, $scan_threshold:expr, $block_words:expr, $capacity:expr, $iterations_to_test:expr) => {
        paste::paste! {
            #[test]
            fn [<$function_name _ $sort_network:snake _ $scan_threshold _ $block_words _ $capacity _ $iterations_to_test>]() {
                $function_name::<$block_words>(
                    $capacity,
                    $iterations_to_test,
                    config_for(crate::SortNetwork::$sort_network, $scan_threshold),
                );
            }
        }
    };
}

macro_rules! create_path_oram_correctness_tests_for_workload {
    ($function_name:ident, $sort_network:ident, $scan_threshold:expr) => {
        create_path_oram_correctness_test!($function_name, $sort_network, $scan_threshold, 1, 1, 10);
        create_path_oram_correctness_test!($function_name, $sort_network, $scan_threshold, 2, 2, 10);
        create_path_oram_correctness_test!($function_name, $sort_network, $scan_threshold, 4, 8, 100);
        create_path_oram_correctness_test!($function_name, $sort_network, $scan_threshold, 2, 8, 100);
        create_path_oram_correctness_test!($function_name, $sort_network, $scan_threshold, 8, 8, 100);
        create_path_oram_correctness_test!($function_name, $sort_network, $scan_threshold, 4, 32, 100);
        // 64 blocks of 3 words: a non-power-of-two width.
        create_path_oram_correctness_test!($function_name, $sort_network, $scan_threshold, 3, 64, 1000);
        create_path_oram_correctness_test!($function_name, $sort_network, $scan_threshold, 4, 100, 1000);
    };
}

macro_rules! create_path_oram_correctness_tests {
    ($sort_network:ident, $scan_threshold:expr) => {
        create_path_oram_correctness_tests_for_workload!(
            test_correctness_linear_workload,
            $sort_network,
            $scan_threshold
        );
        create_path_oram_correctness_tests_for_workload!(
            test_correctness_random_workload,
            $sort_network,
            $scan_threshold
        );
    };
}

pub(crate) use create_path_oram_correctness_test;
pub(crate) use create_path_oram_correctness_tests;
pub(crate) use create_path_oram_correctness_tests_for_workload;
