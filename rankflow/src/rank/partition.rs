//! Block partitioning of an axis over ranks.
//!
//! `n` items are split into `size` contiguous blocks; the first `n % size`
//! blocks hold one extra item.

use std::ops::Range;

/// Returns the block of `n` items owned by `rank` in a group of `size`.
///
/// # Panics
///
/// Panics if `size` is zero.
#[must_use]
pub fn local_range(n: usize, rank: usize, size: usize) -> Range<usize> {
    assert!(size > 0, "cannot partition over zero ranks");
    let base = n / size;
    let extra = n % size;
    let start = rank * base + rank.min(extra);
    let len = base + usize::from(rank < extra);
    start..start + len
}

/// Returns every rank's block of `n` items, ordered by rank.
#[must_use]
pub fn split(n: usize, size: usize) -> Vec<Range<usize>> {
    (0..size).map(|rank| local_range(n, rank, size)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_split() {
        assert_eq!(split(6, 3), vec![0..2, 2..4, 4..6]);
    }

    #[test]
    fn test_uneven_split_front_loads() {
        assert_eq!(split(7, 3), vec![0..3, 3..5, 5..7]);
    }

    #[test]
    fn test_more_ranks_than_items() {
        let blocks = split(2, 4);
        assert_eq!(blocks, vec![0..1, 1..2, 2..2, 2..2]);
        assert_eq!(blocks.iter().map(ExactSizeIterator::len).sum::<usize>(), 2);
    }

    #[test]
    fn test_blocks_cover_axis() {
        for n in 0..20 {
            for size in 1..6 {
                let blocks = split(n, size);
                assert_eq!(blocks.first().map(|r| r.start), Some(0));
                assert_eq!(blocks.last().map(|r| r.end), Some(n));
                assert!(blocks.windows(2).all(|w| w[0].end == w[1].start));
            }
        }
    }
}
