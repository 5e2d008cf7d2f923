//! Block layout validation and the index mapping shared by both operators.
//!
//! A cell of the blocked array is addressed by a block index `n` and an
//! intra-block offset `b`. Its flat coordinate is `i_d = n_d * St_d + b_d`,
//! and it is in bounds iff `i_d < S_d` on every axis.

use std::ops::Range;

use smallvec::{smallvec, SmallVec};

use crate::index::{increment, unravel_index, SVec};
use crate::{BlockError, Result};

/// Highest supported block rank.
pub const MAX_RANK: usize = 3;

/// Flat coordinate of offset `b` inside block `n`: `out_d = n_d * stride_d + b_d`.
#[inline]
pub fn coordinate(n: &[usize], b: &[usize], stride: &[usize], out: &mut [usize]) {
    for d in 0..out.len() {
        out[d] = n[d] * stride[d] + b[d];
    }
}

/// `true` iff `i_d < bound_d` on every axis.
#[inline]
pub fn in_bounds(i: &[usize], bound: &[usize]) -> bool {
    i.iter().zip(bound.iter()).all(|(&i, &s)| i < s)
}

/// Number of blocks along each axis: `(S_d - B_d + St_d) / St_d`.
///
/// # Errors
/// Same as [`BlockGeometry::new`].
pub fn num_blocks(shape: &[usize], block_shape: &[usize], block_stride: &[usize]) -> Result<Vec<usize>> {
    BlockGeometry::new(shape, block_shape, block_stride).map(|g| g.num_blocks.to_vec())
}

/// Validated block layout of one extract/accumulate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockGeometry {
    shape: SVec<usize>,
    block_shape: SVec<usize>,
    block_stride: SVec<usize>,
    num_blocks: SVec<usize>,
}

impl BlockGeometry {
    /// Layout for extracting blocks from an array of shape `shape`.
    ///
    /// # Errors
    /// - [`BlockError::DimensionMismatch`] if `block_shape` or `block_stride`
    ///   does not have one entry per axis of `shape`.
    /// - [`BlockError::UnsupportedRank`] for ranks outside `1..=3`.
    /// - [`BlockError::InvalidConfiguration`] for zero block sizes or strides,
    ///   or when `S_d + St_d < B_d` (a negative block count).
    pub fn new(shape: &[usize], block_shape: &[usize], block_stride: &[usize]) -> Result<Self> {
        let rank = shape.len();
        check_len("block shape", rank, block_shape.len())?;
        check_len("block stride", rank, block_stride.len())?;
        check_rank(rank)?;
        check_positive(block_shape, block_stride)?;

        let mut num_blocks: SVec<usize> = SmallVec::with_capacity(rank);
        for d in 0..rank {
            let (s, b, st) = (shape[d], block_shape[d], block_stride[d]);
            // (s - b + st) / st, without forming s + st.
            let nb = if s >= b {
                (s - b) / st + 1
            } else if b - s <= st {
                0
            } else {
                return Err(BlockError::InvalidConfiguration {
                    axis: d,
                    reason: format!(
                        "block size {b} exceeds array size {s} plus stride {st}; block count would be negative"
                    ),
                });
            };
            num_blocks.push(nb);
        }

        Ok(Self {
            shape: SmallVec::from_slice(shape),
            block_shape: SmallVec::from_slice(block_shape),
            block_stride: SmallVec::from_slice(block_stride),
            num_blocks,
        })
    }

    /// Layout for accumulating a blocked array of shape `blocked_dims` into
    /// an array of shape `shape`.
    ///
    /// The block counts are read from the leading half of `blocked_dims` and
    /// are not re-derived from `shape`; counts that disagree with the
    /// extraction layout only change which contributions land in bounds.
    ///
    /// # Errors
    /// - [`BlockError::DimensionMismatch`] unless `blocked_dims` has twice the
    ///   block rank and `block_stride` and `shape` have one entry per axis.
    /// - [`BlockError::UnsupportedRank`] for ranks outside `1..=3`.
    /// - [`BlockError::InvalidConfiguration`] for zero block sizes or strides,
    ///   or when the last window's end `(NB_d - 1) * St_d + B_d` overflows.
    /// - [`BlockError::ShapeMismatch`] if the trailing half of `blocked_dims`
    ///   differs from `block_shape`.
    pub fn from_blocked(
        blocked_dims: &[usize],
        shape: &[usize],
        block_shape: &[usize],
        block_stride: &[usize],
    ) -> Result<Self> {
        let rank = block_shape.len();
        check_len("blocked array rank", 2 * rank, blocked_dims.len())?;
        check_len("block stride", rank, block_stride.len())?;
        check_len("output shape", rank, shape.len())?;
        check_rank(rank)?;
        check_positive(block_shape, block_stride)?;
        if blocked_dims[rank..] != *block_shape {
            return Err(BlockError::ShapeMismatch(
                blocked_dims[rank..].to_vec(),
                block_shape.to_vec(),
            ));
        }
        check_reach(&blocked_dims[..rank], block_shape, block_stride)?;

        Ok(Self {
            shape: SmallVec::from_slice(shape),
            block_shape: SmallVec::from_slice(block_shape),
            block_stride: SmallVec::from_slice(block_stride),
            num_blocks: SmallVec::from_slice(&blocked_dims[..rank]),
        })
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Shape `S` of the flat array.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn block_shape(&self) -> &[usize] {
        &self.block_shape
    }

    #[inline]
    pub fn block_stride(&self) -> &[usize] {
        &self.block_stride
    }

    #[inline]
    pub fn num_blocks(&self) -> &[usize] {
        &self.num_blocks
    }

    /// Shape `NB ++ B` of the blocked array.
    pub fn blocked_shape(&self) -> Vec<usize> {
        self.num_blocks
            .iter()
            .chain(self.block_shape.iter())
            .copied()
            .collect()
    }

    /// Cells per block, `∏B_d`.
    #[inline]
    pub fn block_len(&self) -> usize {
        self.block_shape.iter().product()
    }

    /// Total number of blocks, `∏NB_d`.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.num_blocks.iter().product()
    }

    /// Writes the flat coordinate of `(n, b)` into `out` and reports whether
    /// it lies inside the array.
    #[inline]
    pub fn coordinate(&self, n: &[usize], b: &[usize], out: &mut [usize]) -> bool {
        coordinate(n, b, &self.block_stride, out);
        in_bounds(out, &self.shape)
    }

    /// Block index `n` of the `block`-th block in row-major order.
    pub(crate) fn block_index(&self, block: usize) -> SVec<usize> {
        let mut n: SVec<usize> = smallvec![0; self.rank()];
        unravel_index(block, &self.num_blocks, &mut n);
        n
    }

    /// Calls `f(k, b, i)` for every in-bounds cell of block `n`.
    ///
    /// `k` is the row-major position of `b` inside the block and `i` the flat
    /// coordinate. Out-of-bounds cells are skipped.
    #[inline]
    pub(crate) fn visit_block<F>(&self, n: &[usize], mut f: F)
    where
        F: FnMut(usize, &[usize], &[usize]),
    {
        let rank = self.rank();
        let mut b: SVec<usize> = smallvec![0; rank];
        let mut i: SVec<usize> = smallvec![0; rank];
        for k in 0..self.block_len() {
            if self.coordinate(n, &b, &mut i) {
                f(k, &b, &i);
            }
            increment(&mut b, &self.block_shape);
        }
    }

    /// Block indices along `axis` whose window covers flat coordinate `i`:
    /// all `n < NB` with `n * St <= i < n * St + B`.
    pub(crate) fn covering_blocks(&self, axis: usize, i: usize) -> Range<usize> {
        let b = self.block_shape[axis];
        let st = self.block_stride[axis];
        let lo = if i + 1 > b {
            let first = i + 1 - b;
            first / st + usize::from(first % st != 0)
        } else {
            0
        };
        let hi = (i / st + 1).min(self.num_blocks[axis]);
        lo..hi.max(lo)
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(BlockError::DimensionMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(())
}

fn check_rank(rank: usize) -> Result<()> {
    if rank == 0 || rank > MAX_RANK {
        return Err(BlockError::UnsupportedRank(rank));
    }
    Ok(())
}

/// `(NB_d - 1) * St_d + B_d` must be representable, so no coordinate wraps.
fn check_reach(num_blocks: &[usize], block_shape: &[usize], block_stride: &[usize]) -> Result<()> {
    for (axis, ((&nb, &b), &st)) in num_blocks
        .iter()
        .zip(block_shape.iter())
        .zip(block_stride.iter())
        .enumerate()
    {
        if nb == 0 {
            continue;
        }
        (nb - 1)
            .checked_mul(st)
            .and_then(|last| last.checked_add(b))
            .ok_or_else(|| BlockError::InvalidConfiguration {
                axis,
                reason: format!("{nb} blocks of size {b} with stride {st} overflow the index range"),
            })?;
    }
    Ok(())
}

fn check_positive(block_shape: &[usize], block_stride: &[usize]) -> Result<()> {
    for (axis, (&b, &st)) in block_shape.iter().zip(block_stride.iter()).enumerate() {
        if b == 0 {
            return Err(BlockError::InvalidConfiguration {
                axis,
                reason: "block size must be positive".to_string(),
            });
        }
        if st == 0 {
            return Err(BlockError::InvalidConfiguration {
                axis,
                reason: "block stride must be positive".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_blocks_formula() {
        assert_eq!(num_blocks(&[6], &[3], &[2]).unwrap(), vec![2]);
        assert_eq!(num_blocks(&[8, 8], &[4, 4], &[4, 4]).unwrap(), vec![2, 2]);
        assert_eq!(num_blocks(&[7, 9], &[3, 2], &[1, 3]).unwrap(), vec![5, 3]);
        assert_eq!(num_blocks(&[10, 5, 4], &[2, 2, 4], &[5, 1, 1]).unwrap(), vec![2, 4, 1]);
    }

    #[test]
    fn test_num_blocks_zero_when_block_barely_too_large() {
        // (2 - 3 + 2) / 2 = 0
        assert_eq!(num_blocks(&[2], &[3], &[2]).unwrap(), vec![0]);
    }

    #[test]
    fn test_negative_block_count_rejected() {
        let err = num_blocks(&[1], &[4], &[2]).unwrap_err();
        assert!(matches!(err, BlockError::InvalidConfiguration { axis: 0, .. }));
    }

    #[test]
    fn test_zero_size_or_stride_rejected() {
        assert!(matches!(
            BlockGeometry::new(&[4, 4], &[2, 0], &[1, 1]),
            Err(BlockError::InvalidConfiguration { axis: 1, .. })
        ));
        assert!(matches!(
            BlockGeometry::new(&[4, 4], &[2, 2], &[0, 1]),
            Err(BlockError::InvalidConfiguration { axis: 0, .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(matches!(
            BlockGeometry::new(&[4, 4], &[2], &[1, 1]),
            Err(BlockError::DimensionMismatch {
                what: "block shape",
                expected: 2,
                found: 1
            })
        ));
        assert!(matches!(
            BlockGeometry::new(&[4, 4], &[2, 2], &[1]),
            Err(BlockError::DimensionMismatch { what: "block stride", .. })
        ));
    }

    #[test]
    fn test_unsupported_rank() {
        assert!(matches!(
            BlockGeometry::new(&[2, 2, 2, 2], &[1, 1, 1, 1], &[1, 1, 1, 1]),
            Err(BlockError::UnsupportedRank(4))
        ));
        assert!(matches!(
            BlockGeometry::new(&[], &[], &[]),
            Err(BlockError::UnsupportedRank(0))
        ));
    }

    #[test]
    fn test_from_blocked_validation() {
        let g = BlockGeometry::from_blocked(&[2, 3], &[6], &[3], &[2]).unwrap();
        assert_eq!(g.num_blocks(), &[2]);
        assert_eq!(g.blocked_shape(), vec![2, 3]);

        assert!(matches!(
            BlockGeometry::from_blocked(&[2, 3, 1], &[6], &[3], &[2]),
            Err(BlockError::DimensionMismatch { what: "blocked array rank", .. })
        ));
        assert!(matches!(
            BlockGeometry::from_blocked(&[2, 3], &[6, 1], &[3], &[2]),
            Err(BlockError::DimensionMismatch { what: "output shape", .. })
        ));
        assert!(matches!(
            BlockGeometry::from_blocked(&[2, 4], &[6], &[3], &[2]),
            Err(BlockError::ShapeMismatch(_, _))
        ));
        assert!(matches!(
            BlockGeometry::from_blocked(&[1; 8], &[1; 4], &[1; 4], &[1; 4]),
            Err(BlockError::UnsupportedRank(4))
        ));
    }

    #[test]
    fn test_huge_stride_does_not_overflow() {
        assert_eq!(num_blocks(&[5], &[2], &[usize::MAX]).unwrap(), vec![1]);
        assert_eq!(num_blocks(&[2], &[5], &[usize::MAX]).unwrap(), vec![0]);
        assert_eq!(num_blocks(&[usize::MAX], &[1], &[usize::MAX]).unwrap(), vec![1]);
        assert!(matches!(
            num_blocks(&[0], &[usize::MAX], &[1]),
            Err(BlockError::InvalidConfiguration { axis: 0, .. })
        ));

        let g = BlockGeometry::new(&[5], &[2], &[usize::MAX]).unwrap();
        assert_eq!(g.covering_blocks(0, 1), 0..1);
        assert_eq!(g.covering_blocks(0, 4), 1..1);
    }

    #[test]
    fn test_from_blocked_rejects_wrapping_reach() {
        assert!(matches!(
            BlockGeometry::from_blocked(&[2, 2], &[5], &[2], &[usize::MAX]),
            Err(BlockError::InvalidConfiguration { axis: 0, .. })
        ));
        assert!(matches!(
            BlockGeometry::from_blocked(&[3, 2, 2, 2], &[5, 5], &[2, 2], &[1, usize::MAX / 2]),
            Ok(_)
        ));
        assert!(matches!(
            BlockGeometry::from_blocked(&[3, 3, 2, 2], &[5, 5], &[2, 2], &[1, usize::MAX / 2]),
            Err(BlockError::InvalidConfiguration { axis: 1, .. })
        ));
        // No blocks, nothing to reach.
        assert!(BlockGeometry::from_blocked(&[0, 2], &[5], &[2], &[usize::MAX]).is_ok());
    }

    #[test]
    fn test_from_blocked_trusts_block_counts() {
        // 3 blocks do not fit a length-6 array with B=3, St=2; still accepted.
        let g = BlockGeometry::from_blocked(&[3, 3], &[6], &[3], &[2]).unwrap();
        assert_eq!(g.num_blocks(), &[3]);
    }

    #[test]
    fn test_coordinate_and_in_bounds() {
        let g = BlockGeometry::new(&[5, 4], &[2, 3], &[2, 2]).unwrap();
        let mut i = [0usize; 2];
        assert!(g.coordinate(&[1, 0], &[1, 2], &mut i));
        assert_eq!(i, [3, 2]);
        assert!(!g.coordinate(&[2, 1], &[1, 2], &mut i));
        assert_eq!(i, [5, 4]);
        assert!(in_bounds(&[4, 3], &[5, 4]));
        assert!(!in_bounds(&[4, 4], &[5, 4]));
    }

    #[test]
    fn test_visit_block_skips_out_of_range() {
        // Oversized counts: block 2 covers flat indices 4, 5, 6 of a length-6 array.
        let g = BlockGeometry::from_blocked(&[3, 3], &[6], &[3], &[2]).unwrap();
        let mut seen = Vec::new();
        g.visit_block(&g.block_index(2), |k, b, i| seen.push((k, b[0], i[0])));
        assert_eq!(seen, vec![(0, 0, 4), (1, 1, 5)]);
    }

    #[test]
    fn test_covering_blocks_matches_definition() {
        for &(s, b, st) in &[(6, 3, 2), (9, 2, 3), (7, 4, 1), (8, 4, 4), (5, 1, 2)] {
            let g = BlockGeometry::new(&[s], &[b], &[st]).unwrap();
            let nb = g.num_blocks()[0];
            for i in 0..s {
                let expected: Vec<usize> = (0..nb).filter(|&n| n * st <= i && i < n * st + b).collect();
                let got: Vec<usize> = g.covering_blocks(0, i).collect();
                assert_eq!(got, expected, "s={s} b={b} st={st} i={i}");
            }
        }
    }
}
