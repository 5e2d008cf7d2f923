//! Block accumulation (overlap-add): blocked array back to flat array.

use tracing::{debug, trace};

use crate::atomic::AtomicAccumulate;
use crate::context::ExecutionContext;
use crate::geometry::BlockGeometry;
use crate::index::ravel_index;
use crate::scalar::BlockScalar;
use crate::view::{StridedArray, StridedView};
use crate::Result;

#[cfg(feature = "parallel")]
use crate::atomic::AtomicSink;
#[cfg(feature = "parallel")]
use crate::context::{AccumulateMode, Traversal};
#[cfg(feature = "parallel")]
use crate::index::{increment_in, unravel_index, SVec};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "parallel")]
use smallvec::smallvec;
#[cfg(feature = "parallel")]
use std::ops::Range;

/// Sum the windows of a blocked array of shape `NB ++ block_shape` into a
/// zero array of shape `output_shape`.
///
/// Cell `(n, b)` of `input` is added to `output[n * St + b]`; contributions
/// whose coordinate lies outside `output_shape` are dropped. This is the
/// adjoint of [`crate::array_to_blocks`] with the same shape, block shape
/// and stride.
///
/// `NB` is read from the leading half of `input.dims()` and is not checked
/// against `output_shape`; the caller keeps the two consistent.
///
/// With a parallel context, overlapping windows are combined either by
/// lock-free atomic adds ([`AccumulateMode::Atomic`](crate::AccumulateMode::Atomic),
/// complex values split per lane) or by one task per output cell
/// ([`AccumulateMode::Gather`](crate::AccumulateMode::Gather)).
///
/// # Errors
/// See [`BlockGeometry::from_blocked`]. Parallel atomic accumulation may also
/// return [`crate::BlockError::PodCastUnsupported`].
///
/// # Example
/// ```rust
/// use strided_blocks::{blocks_to_array, ExecutionContext, StridedArray};
///
/// let ones = StridedArray::from_vec(vec![1.0f64; 6], &[2, 3]).unwrap();
/// let y = blocks_to_array(&ones.view(), &[5], &[3], &[2], &ExecutionContext::sequential()).unwrap();
/// assert_eq!(y.data(), &[1.0, 1.0, 2.0, 1.0, 1.0]);
/// ```
pub fn blocks_to_array<T: AtomicAccumulate>(
    input: &StridedView<'_, T>,
    output_shape: &[usize],
    block_shape: &[usize],
    block_stride: &[usize],
    ctx: &ExecutionContext,
) -> Result<StridedArray<T>> {
    let geom = BlockGeometry::from_blocked(input.dims(), output_shape, block_shape, block_stride)?;
    let mut output = StridedArray::<T>::zeros(output_shape);

    debug!(
        shape = ?geom.shape(),
        block_shape = ?geom.block_shape(),
        block_stride = ?geom.block_stride(),
        num_blocks = ?geom.num_blocks(),
        "blocks_to_array"
    );

    if output.is_empty() || input.is_empty() {
        return Ok(output);
    }

    #[cfg(feature = "parallel")]
    {
        if let Traversal::Parallel(mode) = ctx.plan(input.len()) {
            let geom = &geom;
            let out = output.data_mut();
            match mode {
                AccumulateMode::Atomic => {
                    let strategy = T::STRATEGY;
                    debug!(?strategy, "blocks_to_array: parallel atomic scatter");
                    ctx.install(|| scatter_atomic(geom, input, out))??;
                }
                AccumulateMode::Gather => {
                    debug!("blocks_to_array: parallel gather");
                    ctx.install(|| gather(geom, input, out))?;
                }
            }
            return Ok(output);
        }
    }

    trace!(blocks = geom.block_count(), ?ctx, "blocks_to_array: sequential traversal");
    scatter_sequential(&geom, input, output.data_mut());
    Ok(output)
}

/// `Σ idx_d * strides_d`.
#[inline]
fn partial_offset(idx: &[usize], strides: &[isize]) -> isize {
    idx.iter()
        .zip(strides.iter())
        .map(|(&i, &s)| i as isize * s)
        .sum()
}

/// Blocks in row-major order, offsets in row-major order within each block.
fn scatter_sequential<T: BlockScalar>(geom: &BlockGeometry, input: &StridedView<'_, T>, out: &mut [T]) {
    let rank = geom.rank();
    let (outer, inner) = input.strides().split_at(rank);
    for block in 0..geom.block_count() {
        let n = geom.block_index(block);
        let origin = partial_offset(&n, outer);
        geom.visit_block(&n, |_k, b, i| {
            let pos = ravel_index(i, geom.shape());
            out[pos] = out[pos] + input.at(origin + partial_offset(b, inner));
        });
    }
}

/// One rayon task per block; overlapping cells meet in atomic adds.
#[cfg(feature = "parallel")]
fn scatter_atomic<T: AtomicAccumulate>(
    geom: &BlockGeometry,
    input: &StridedView<'_, T>,
    out: &mut [T],
) -> Result<()> {
    let sink = AtomicSink::new(out)?;
    let rank = geom.rank();
    let (outer, inner) = input.strides().split_at(rank);
    (0..geom.block_count()).into_par_iter().for_each(|block| {
        let n = geom.block_index(block);
        let origin = partial_offset(&n, outer);
        geom.visit_block(&n, |_k, b, i| {
            sink.add(
                ravel_index(i, geom.shape()),
                input.at(origin + partial_offset(b, inner)),
            );
        });
    });
    Ok(())
}

/// One rayon task per output cell, visiting exactly the windows that cover it.
///
/// Contributions are summed in row-major block order, the same order the
/// sequential traversal uses.
#[cfg(feature = "parallel")]
fn gather<T: BlockScalar>(geom: &BlockGeometry, input: &StridedView<'_, T>, out: &mut [T]) {
    let rank = geom.rank();
    let strides = input.strides();
    let stride = geom.block_stride();
    out.par_iter_mut().enumerate().for_each(|(pos, cell)| {
        let mut i: SVec<usize> = smallvec![0; rank];
        unravel_index(pos, geom.shape(), &mut i);
        let ranges: SVec<Range<usize>> = (0..rank).map(|d| geom.covering_blocks(d, i[d])).collect();
        if ranges.iter().any(|r| r.is_empty()) {
            return;
        }
        let mut n: SVec<usize> = ranges.iter().map(|r| r.start).collect();
        let mut acc = T::zero();
        loop {
            let mut offset = 0isize;
            for d in 0..rank {
                let b = i[d] - n[d] * stride[d];
                offset += n[d] as isize * strides[d] + b as isize * strides[rank + d];
            }
            acc = acc + input.at(offset);
            if !increment_in(&mut n, &ranges) {
                break;
            }
        }
        *cell = acc;
    });
}
