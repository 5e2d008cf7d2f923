//! Block extraction: flat array to blocked array.

use tracing::{debug, trace};

use crate::context::ExecutionContext;
use crate::geometry::BlockGeometry;
use crate::scalar::BlockScalar;
use crate::view::{StridedArray, StridedView};
use crate::Result;

#[cfg(feature = "parallel")]
use crate::context::Traversal;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Split `input` into windows of shape `block_shape` placed every
/// `block_stride` elements.
///
/// The result has shape `NB ++ block_shape` with
/// `NB_d = (S_d - B_d + St_d) / St_d`. Cell `(n, b)` holds
/// `input[n * St + b]`, or zero when that coordinate lies outside `input`.
///
/// Every output cell is written by exactly one `(n, b)` pair, so the
/// parallel traversal needs no synchronisation.
///
/// # Errors
/// See [`BlockGeometry::new`]. Nothing is allocated when validation fails.
///
/// # Example
/// ```rust
/// use strided_blocks::{array_to_blocks, ExecutionContext, StridedArray};
///
/// let x = StridedArray::from_fn(&[4, 4], |idx| (idx[0] * 4 + idx[1]) as f64);
/// let blocks = array_to_blocks(&x.view(), &[2, 2], &[2, 2], &ExecutionContext::sequential()).unwrap();
/// assert_eq!(blocks.dims(), &[2, 2, 2, 2]);
/// assert_eq!(blocks.get(&[1, 0, 0, 1]), 9.0);
/// ```
pub fn array_to_blocks<T: BlockScalar>(
    input: &StridedView<'_, T>,
    block_shape: &[usize],
    block_stride: &[usize],
    ctx: &ExecutionContext,
) -> Result<StridedArray<T>> {
    let geom = BlockGeometry::new(input.dims(), block_shape, block_stride)?;
    let mut output = StridedArray::<T>::zeros(&geom.blocked_shape());
    let block_len = geom.block_len();

    debug!(
        shape = ?geom.shape(),
        block_shape = ?geom.block_shape(),
        block_stride = ?geom.block_stride(),
        num_blocks = ?geom.num_blocks(),
        "array_to_blocks"
    );

    if output.is_empty() {
        return Ok(output);
    }

    #[cfg(feature = "parallel")]
    {
        if let Traversal::Parallel(_) = ctx.plan(output.len()) {
            debug!(blocks = geom.block_count(), "array_to_blocks: parallel traversal");
            let geom = &geom;
            let out = output.data_mut();
            ctx.install(|| {
                out.par_chunks_mut(block_len)
                    .enumerate()
                    .for_each(|(block, chunk)| fill_block(geom, input, block, chunk));
            })?;
            return Ok(output);
        }
    }

    trace!(blocks = geom.block_count(), ?ctx, "array_to_blocks: sequential traversal");
    for (block, chunk) in output.data_mut().chunks_mut(block_len).enumerate() {
        fill_block(&geom, input, block, chunk);
    }
    Ok(output)
}

/// Copy the in-bounds cells of the `block`-th window into `chunk`.
#[inline]
fn fill_block<T: Copy>(geom: &BlockGeometry, input: &StridedView<'_, T>, block: usize, chunk: &mut [T]) {
    let n = geom.block_index(block);
    geom.visit_block(&n, |k, _b, i| {
        chunk[k] = input.at(input.linear_offset(i));
    });
}
