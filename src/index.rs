//! Multi-index helpers shared by every rank.
//!
//! Both operators walk the domain `∏NB_d × ∏B_d` through the same two
//! primitives: `unravel_index` turns a flat position into a row-major
//! multi-index, and `increment` advances a multi-index like an odometer.

use std::ops::Range;

use smallvec::SmallVec;

/// Stack-allocated index storage. 6 slots cover a rank-3 blocked array.
pub(crate) type SVec<T> = SmallVec<[T; 6]>;

/// Decompose a row-major flat position into `out`.
///
/// `flat` must be smaller than the product of `dims`.
#[inline]
pub(crate) fn unravel_index(mut flat: usize, dims: &[usize], out: &mut [usize]) {
    debug_assert_eq!(dims.len(), out.len());
    for d in (0..dims.len()).rev() {
        out[d] = flat % dims[d];
        flat /= dims[d];
    }
}

/// Row-major flat position of `idx` within `dims`.
#[inline]
pub(crate) fn ravel_index(idx: &[usize], dims: &[usize]) -> usize {
    idx.iter()
        .zip(dims.iter())
        .fold(0usize, |pos, (&i, &d)| pos * d + i)
}

/// Advance `idx` to the next row-major position.
///
/// Returns `false` once the index wraps back to all zeros.
#[inline]
pub(crate) fn increment(idx: &mut [usize], dims: &[usize]) -> bool {
    for d in (0..dims.len()).rev() {
        idx[d] += 1;
        if idx[d] < dims[d] {
            return true;
        }
        idx[d] = 0;
    }
    false
}

/// Advance `idx` row-major through the box `∏ranges`.
///
/// Returns `false` once every axis wrapped back to its range start.
#[inline]
#[cfg_attr(not(any(test, feature = "parallel")), allow(dead_code))]
pub(crate) fn increment_in(idx: &mut [usize], ranges: &[Range<usize>]) -> bool {
    for d in (0..ranges.len()).rev() {
        idx[d] += 1;
        if idx[d] < ranges[d].end {
            return true;
        }
        idx[d] = ranges[d].start;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unravel_matches_increment() {
        let dims = [2, 3, 4];
        let mut walk = [0usize; 3];
        let mut out = [0usize; 3];
        for flat in 0..24 {
            unravel_index(flat, &dims, &mut out);
            assert_eq!(out, walk);
            assert_eq!(ravel_index(&out, &dims), flat);
            let more = increment(&mut walk, &dims);
            assert_eq!(more, flat != 23);
        }
        assert_eq!(walk, [0, 0, 0]);
    }

    #[test]
    fn test_unravel_last_axis_fastest() {
        let mut out = [0usize; 2];
        unravel_index(5, &[2, 3], &mut out);
        assert_eq!(out, [1, 2]);
        unravel_index(3, &[2, 3], &mut out);
        assert_eq!(out, [1, 0]);
    }

    #[test]
    fn test_increment_in_box() {
        let ranges = [1..3, 4..6];
        let mut idx = [1usize, 4];
        let mut seen = vec![(idx[0], idx[1])];
        while increment_in(&mut idx, &ranges) {
            seen.push((idx[0], idx[1]));
        }
        assert_eq!(seen, vec![(1, 4), (1, 5), (2, 4), (2, 5)]);
        assert_eq!(idx, [1, 4]);
    }

    #[test]
    fn test_increment_rank_one() {
        let mut idx = [0usize];
        assert!(increment(&mut idx, &[2]));
        assert_eq!(idx, [1]);
        assert!(!increment(&mut idx, &[2]));
        assert_eq!(idx, [0]);
    }
}
