//! The swap-or-not shuffle used to assign validators to committees.
//!
//! Every round pairs each index `i` with `flip = (pivot - i) mod n` and swaps the pair if the bit
//! at `max(i, flip)` in a seeded hash is set. Rounds are involutions, so a whole list can be
//! permuted in place with one pass per round.

use core::{num::NonZeroU64, ops::Range};

use anyhow::{ensure, Result};
use bit_field::BitArray as _;
use types::{phase0::primitives::H256, preset::Preset};

const BITS_PER_HASH: usize = H256::len_bytes() * 8;

/// Permutes `slice` so that `slice[i]` ends up holding the element that was at
/// `shuffle_single(i, slice.len(), seed)`.
///
/// This is the order in which committees are read off the active validator indices.
// Based on the list variant popularized by protolambda:
// <https://github.com/protolambda/eth2-docs/tree/de65f38857f1e27ffb6f25107d61e795cf1a5ad7#shuffling>
pub fn shuffle_slice<P: Preset, T>(slice: &mut [T], seed: H256) -> Result<()> {
    let length = slice.len();

    let Some(index_count) = NonZeroU64::new(length.try_into()?) else {
        return Ok(());
    };

    // `shuffle_single` applies round 0 first, so composing in-place swaps has to start from the
    // last round.
    for round in (0..P::SHUFFLE_ROUND_COUNT).rev() {
        let pivot = usize::try_from(compute_pivot(seed, round, index_count))?;

        // Indices up to the pivot are paired with `pivot - i`.
        swap_pairs(seed, round, slice, 0..(pivot + 1) / 2, pivot)?;

        // Indices past the pivot are paired with `pivot + length - i`.
        swap_pairs(
            seed,
            round,
            slice,
            pivot + 1..(pivot + length + 1) / 2,
            pivot + length,
        )?;
    }

    Ok(())
}

fn swap_pairs<T>(
    seed: H256,
    round: u8,
    slice: &mut [T],
    lower_indices: Range<usize>,
    pair_sum: usize,
) -> Result<()> {
    let mut cached_source = None;

    for index in lower_indices {
        let flip = pair_sum - index;
        let position_window = flip / BITS_PER_HASH;

        let source = match cached_source {
            Some((window, source)) if window == position_window => source,
            _ => {
                let source = compute_source(seed, round, position_window)?;
                cached_source = Some((position_window, source));
                source
            }
        };

        if source.as_slice().get_bit(flip % BITS_PER_HASH) {
            slice.swap(index, flip);
        }
    }

    Ok(())
}

/// Computes the position that `index` is moved to by the shuffle.
///
/// Equivalent to `compute_shuffled_index` in `consensus-specs`.
pub fn shuffle_single<P: Preset>(
    mut index: u64,
    index_count: NonZeroU64,
    seed: H256,
) -> Result<u64> {
    ensure!(
        index < index_count.get(),
        "index {index} out of bounds for {index_count} indices",
    );

    for round in 0..P::SHUFFLE_ROUND_COUNT {
        let pivot = compute_pivot(seed, round, index_count);
        let flip = (pivot + index_count.get() - index) % index_count;
        let position = usize::try_from(index.max(flip))?;
        let source = compute_source(seed, round, position / BITS_PER_HASH)?;

        if source.as_slice().get_bit(position % BITS_PER_HASH) {
            index = flip;
        }
    }

    Ok(index)
}

fn compute_pivot(seed: H256, round: u8, index_count: NonZeroU64) -> u64 {
    let mut bytes = [0; size_of::<u64>()];
    bytes.copy_from_slice(&hashing::hash_256_8(seed, round)[..size_of::<u64>()]);
    u64::from_le_bytes(bytes) % index_count
}

fn compute_source(seed: H256, round: u8, position_window: usize) -> Result<H256> {
    Ok(hashing::hash_256_8_32(seed, round, position_window.try_into()?))
}

#[cfg(test)]
mod tests {
    use itertools::Itertools as _;
    use test_case::test_case;
    use types::preset::{Mainnet, Minimal};

    use super::*;

    fn seed() -> H256 {
        hashing::hash(b"shuffling")
    }

    // `compute_shuffled_index` from `consensus-specs` run over `0..100` with the minimal preset.
    const SHUFFLED_100: [u64; 100] = [
        10, 69, 70, 86, 32, 58, 83, 64, 33, 74, 18, 94, 92, 48, 99, 42, 82, 91, 61, 0,
        14, 45, 24, 54, 38, 51, 75, 67, 20, 56, 13, 53, 90, 6, 39, 44, 21, 28, 95, 49,
        50, 81, 65, 66, 34, 85, 97, 2, 80, 26, 60, 16, 72, 68, 41, 62, 46, 4, 98, 88,
        43, 12, 29, 52, 9, 25, 36, 96, 22, 93, 71, 30, 19, 5, 76, 35, 37, 78, 63, 8,
        11, 57, 7, 73, 23, 47, 40, 84, 89, 27, 17, 87, 55, 31, 77, 59, 15, 3, 79, 1,
    ];

    #[test_case(&[]; "empty")]
    #[test_case(&[0]; "one element")]
    #[test_case(&[0, 1]; "two elements")]
    #[test_case(&[6, 2, 8, 4, 9, 0, 7, 1, 3, 5]; "ten elements")]
    #[test_case(&SHUFFLED_100; "one hundred elements")]
    fn shuffle_slice_matches_reference_permutation(expected: &[u64]) -> Result<()> {
        let length = u64::try_from(expected.len())?;
        let mut shuffled = (0..length).collect_vec();

        shuffle_slice::<Minimal, _>(&mut shuffled, seed())?;

        assert_eq!(shuffled, expected);

        Ok(())
    }

    #[test_case(1)]
    #[test_case(2)]
    #[test_case(3)]
    #[test_case(100)]
    #[test_case(256)]
    #[test_case(257)]
    #[test_case(600)]
    fn shuffle_slice_agrees_with_shuffle_single(length: u64) -> Result<()> {
        let index_count = NonZeroU64::new(length).expect("test lengths are nonzero");
        let mut shuffled = (0..length).collect_vec();

        shuffle_slice::<Minimal, _>(&mut shuffled, seed())?;

        for (position, element) in shuffled.into_iter().enumerate() {
            let expected = shuffle_single::<Minimal>(position.try_into()?, index_count, seed())?;
            assert_eq!(element, expected);
        }

        Ok(())
    }

    #[test]
    fn shuffle_slice_is_a_permutation() -> Result<()> {
        let mut shuffled = (0..1000_u64).collect_vec();

        shuffle_slice::<Mainnet, _>(&mut shuffled, seed())?;

        assert_ne!(shuffled, (0..1000).collect_vec());
        assert_eq!(shuffled.iter().copied().sorted().collect_vec(), (0..1000).collect_vec());

        Ok(())
    }

    #[test]
    fn shuffle_slice_accepts_empty_slice() -> Result<()> {
        let mut empty: [u64; 0] = [];
        shuffle_slice::<Minimal, _>(&mut empty, seed())
    }

    #[test]
    fn shuffle_single_rejects_out_of_bounds_index() {
        let index_count = NonZeroU64::new(5).expect("5 is nonzero");
        assert!(shuffle_single::<Minimal>(5, index_count, seed()).is_err());
    }
}
