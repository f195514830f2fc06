// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Utilities: integer logarithms and oblivious sorting networks.

use subtle::{Choice, ConditionallySelectable, ConstantTimeGreater, ConstantTimeLess};

/// Returns the smallest `k` such that `2^k >= n`. `ceil_log2(0)` and `ceil_log2(1)` are 0.
pub fn ceil_log2(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        (n - 1).ilog2() + 1
    }
}

/// The comparator network used to sort the stash before eviction.
///
/// Both networks perform a sequence of compare-and-swap operations that depends only
/// on the length of the input, and both produce the same order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortNetwork {
    /// Batcher's bitonic sorter, generalized to arbitrary lengths.
    Bitonic,
    /// Batcher's odd-even merge sort, generalized to arbitrary lengths.
    #[default]
    OddEvenMerge,
}

impl SortNetwork {
    /// Sorts `items` (with their paired `keys`) in ascending order according to `greater`,
    /// using this network.
    ///
    /// `greater(a, a_key, b, b_key)` must return a true `Choice` exactly when `(a, a_key)`
    /// sorts strictly after `(b, b_key)`, and must be constant-time.
    pub fn sort_by<T, K, F>(&self, items: &mut [T], keys: &mut [K], greater: F)
    where
        T: ConditionallySelectable,
        K: ConditionallySelectable,
        F: Fn(&T, &K, &T, &K) -> Choice,
    {
        match self {
            SortNetwork::Bitonic => bitonic_sort_by(items, keys, greater),
            SortNetwork::OddEvenMerge => odd_even_merge_sort_by(items, keys, greater),
        }
    }
}

/// Conditionally swaps `items[i]`/`items[j]` together with `keys[i]`/`keys[j]`, for `i < j`.
fn conditional_swap_pair<T: ConditionallySelectable, K: ConditionallySelectable>(
    items: &mut [T],
    keys: &mut [K],
    i: usize,
    j: usize,
    do_swap: Choice,
) {
    debug_assert!(i < j);
    let (items_i, items_j) = items.split_at_mut(j);
    T::conditional_swap(&mut items_i[i], &mut items_j[0], do_swap);
    let (keys_i, keys_j) = keys.split_at_mut(j);
    K::conditional_swap(&mut keys_i[i], &mut keys_j[0], do_swap);
}

/// Sorts `items` in ascending order of `keys`, obliviously and in constant time.
/// Assumes that `keys.len() == items.len()`.
pub fn bitonic_sort_by_keys<T, K>(items: &mut [T], keys: &mut [K])
where
    T: ConditionallySelectable,
    K: ConditionallySelectable + ConstantTimeGreater,
{
    bitonic_sort_by(items, keys, |_, a, _, b| a.ct_gt(b));
}

/// Sorts `items` and their paired `keys` in ascending order of `greater`, obliviously and
/// in constant time. The algorithm is bitonic sort, based on code written by Hans Werner Lang
/// and available [here](https://hwlang.de/algorithmen/sortieren/bitonic/oddn.htm),
/// which does not require the length to be a power of two.
pub fn bitonic_sort_by<T, K, F>(items: &mut [T], keys: &mut [K], greater: F)
where
    T: ConditionallySelectable,
    K: ConditionallySelectable,
    F: Fn(&T, &K, &T, &K) -> Choice,
{
    assert_eq!(items.len(), keys.len());
    let ascending: Choice = 1.into();
    helper_bitonic_sort_by(0, items.len(), items, keys, ascending, &greater);
}

fn helper_bitonic_sort_by<T, K, F>(
    lo: usize,
    n: usize,
    items: &mut [T],
    keys: &mut [K],
    direction: Choice,
    greater: &F,
) where
    T: ConditionallySelectable,
    K: ConditionallySelectable,
    F: Fn(&T, &K, &T, &K) -> Choice,
{
    if n > 1 {
        let m = n / 2;
        helper_bitonic_sort_by(lo, m, items, keys, !direction, greater);
        helper_bitonic_sort_by(lo + m, n - m, items, keys, direction, greater);
        helper_bitonic_merge_by(lo, n, items, keys, direction, greater);
    }
}

fn helper_bitonic_merge_by<T, K, F>(
    lo: usize,
    n: usize,
    items: &mut [T],
    keys: &mut [K],
    direction: Choice,
    greater: &F,
) where
    T: ConditionallySelectable,
    K: ConditionallySelectable,
    F: Fn(&T, &K, &T, &K) -> Choice,
{
    if n > 1 {
        let m = n.next_power_of_two() >> 1;
        for i in lo..(lo + n - m) {
            let j = i + m;
            let igtj = greater(&items[i], &keys[i], &items[j], &keys[j]);
            // Ascending: swap when i > j. Descending: swap when i <= j.
            let do_swap = !(igtj ^ direction);
            conditional_swap_pair(items, keys, i, j, do_swap);
        }

        // The lower `m` entries and the upper `n - m` entries are now each bitonic,
        // and every entry of the upper part is ordered after every entry of the lower part.
        helper_bitonic_merge_by(lo, m, items, keys, direction, greater);
        helper_bitonic_merge_by(lo + m, n - m, items, keys, direction, greater);
    }
}

/// Sorts `items` and their paired `keys` in ascending order of `greater`, obliviously and
/// in constant time, using Batcher's odd-even merge sort. The iterative formulation
/// (following [Wikipedia](https://en.wikipedia.org/wiki/Batcher_odd%E2%80%93even_mergesort))
/// works for any length.
pub fn odd_even_merge_sort_by<T, K, F>(items: &mut [T], keys: &mut [K], greater: F)
where
    T: ConditionallySelectable,
    K: ConditionallySelectable,
    F: Fn(&T, &K, &T, &K) -> Choice,
{
    assert_eq!(items.len(), keys.len());
    let n = items.len();

    let mut p = 1;
    while p < n {
        let mut k = p;
        while k >= 1 {
            let mut j = k % p;
            while j < n - k {
                for i in 0..k.min(n - j - k) {
                    if (i + j) / (2 * p) == (i + j + k) / (2 * p) {
                        let lo = i + j;
                        let hi = lo + k;
                        let do_swap = greater(&items[lo], &keys[lo], &items[hi], &keys[hi]);
                        conditional_swap_pair(items, keys, lo, hi, do_swap);
                    }
                }
                j += 2 * k;
            }
            k /= 2;
        }
        p *= 2;
    }
}

/// Returns a `Choice` that is true iff `lower <= value <= upper`, in constant time.
pub(crate) fn ct_in_range<T: ConstantTimeLess + ConstantTimeGreater>(
    value: &T,
    lower: &T,
    upper: &T,
) -> Choice {
    !value.ct_lt(lower) & !value.ct_gt(upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplicate::duplicate_item;
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
        assert_eq!(ceil_log2(1 << 33), 33);
        assert_eq!(ceil_log2((1 << 33) + 1), 34);
    }

    #[test]
    fn test_ct_in_range() {
        assert!(bool::from(ct_in_range(&5u64, &5, &9)));
        assert!(bool::from(ct_in_range(&9u64, &5, &9)));
        assert!(!bool::from(ct_in_range(&4u64, &5, &9)));
        assert!(!bool::from(ct_in_range(&10u64, &5, &9)));
    }

    #[test]
    fn test_bitonic_sort_by_keys() {
        let mut rng = StdRng::seed_from_u64(0);
        let n = 128u64;
        let mut permutation: Vec<u64> = (0..n).collect();
        permutation.shuffle(&mut rng);

        let mut items = permutation.clone();
        let mut keys: Vec<u64> = permutation.iter().map(|e| e + 2 * n).collect();

        bitonic_sort_by_keys(&mut items, &mut keys);
        for i in 0..(items.len() - 1) {
            assert!(keys[i] <= keys[i + 1]);
            assert_eq!(keys[i], items[i] + 2 * n);
        }
    }

    fn greater_by_key_then_item(a: &u64, a_key: &u64, b: &u64, b_key: &u64) -> Choice {
        a_key.ct_gt(b_key) | (subtle::ConstantTimeEq::ct_eq(a_key, b_key) & a.ct_gt(b))
    }

    #[duplicate_item(
        test_name                        sort_function;
        [test_bitonic_sort_lengths]      [bitonic_sort_by];
        [test_odd_even_merge_sort_lengths] [odd_even_merge_sort_by];
    )]
    #[test]
    fn test_name() {
        let mut rng = StdRng::seed_from_u64(1);
        for n in [0usize, 1, 2, 3, 5, 7, 16, 30, 31, 33, 100] {
            let original_keys: Vec<u64> = (0..n).map(|_| rng.gen_range(0..8)).collect();
            let mut items: Vec<u64> = (0..n as u64).collect();
            let mut keys = original_keys.clone();

            sort_function(&mut items, &mut keys, greater_by_key_then_item);

            for i in 1..n {
                assert!(
                    (keys[i - 1], items[i - 1]) < (keys[i], items[i]),
                    "length {n} not sorted at {i}"
                );
            }
            // Each item still carries the key it started with.
            for i in 0..n {
                assert_eq!(keys[i], original_keys[items[i] as usize]);
            }
        }
    }

    #[test]
    fn sort_networks_agree() {
        let mut rng = StdRng::seed_from_u64(2);
        let n = 1024;
        let original_keys: Vec<u64> = (0..n).map(|_| rng.gen_range(0..n as u64)).collect();
        let original_items: Vec<u64> = (0..n as u64).collect();

        let mut bitonic_items = original_items.clone();
        let mut bitonic_keys = original_keys.clone();
        SortNetwork::Bitonic.sort_by(
            &mut bitonic_items,
            &mut bitonic_keys,
            greater_by_key_then_item,
        );

        let mut odd_even_items = original_items;
        let mut odd_even_keys = original_keys;
        SortNetwork::OddEvenMerge.sort_by(
            &mut odd_even_items,
            &mut odd_even_keys,
            greater_by_key_then_item,
        );

        assert_eq!(bitonic_items, odd_even_items);
        assert_eq!(bitonic_keys, odd_even_keys);
    }
}
