//! Block extraction and accumulation as the forward and adjoint of one
//! linear map.

use num_traits::One;

use crate::accumulate::blocks_to_array;
use crate::atomic::AtomicAccumulate;
use crate::context::ExecutionContext;
use crate::extract::array_to_blocks;
use crate::geometry::BlockGeometry;
use crate::view::{StridedArray, StridedView};
use crate::{BlockError, Result};

/// A linear map between arrays of fixed shapes.
pub trait LinearOperator<T> {
    /// Shape accepted by [`apply`](Self::apply).
    fn ishape(&self) -> &[usize];

    /// Shape produced by [`apply`](Self::apply).
    fn oshape(&self) -> &[usize];

    /// `y = A x`.
    fn apply(&self, x: &StridedView<'_, T>, ctx: &ExecutionContext) -> Result<StridedArray<T>>;

    /// `x = A^H y`.
    fn apply_adjoint(&self, y: &StridedView<'_, T>, ctx: &ExecutionContext) -> Result<StridedArray<T>>;
}

/// Block extraction with a configuration fixed at construction.
///
/// The forward map is [`array_to_blocks`], the adjoint is
/// [`blocks_to_array`]. Unlike the free functions, both directions check
/// their input shape, so the adjoint never sees block counts that disagree
/// with the forward layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOperator {
    geom: BlockGeometry,
    oshape: Vec<usize>,
}

impl BlockOperator {
    /// # Errors
    /// Same as [`BlockGeometry::new`].
    pub fn new(ishape: &[usize], block_shape: &[usize], block_stride: &[usize]) -> Result<Self> {
        let geom = BlockGeometry::new(ishape, block_shape, block_stride)?;
        let oshape = geom.blocked_shape();
        Ok(Self { geom, oshape })
    }

    pub fn geometry(&self) -> &BlockGeometry {
        &self.geom
    }

    pub fn num_blocks(&self) -> &[usize] {
        self.geom.num_blocks()
    }

    /// Number of windows covering each cell of the flat array.
    ///
    /// Cells no window reaches are zero.
    pub fn overlap_count<T>(&self, ctx: &ExecutionContext) -> Result<StridedArray<T>>
    where
        T: AtomicAccumulate + One,
    {
        let ones = StridedArray::from_fn(self.geom.shape(), |_| T::one());
        let blocks = self.apply(&ones.view(), ctx)?;
        self.apply_adjoint(&blocks.view(), ctx)
    }

    fn check_shape(expected: &[usize], found: &[usize]) -> Result<()> {
        if expected != found {
            return Err(BlockError::ShapeMismatch(found.to_vec(), expected.to_vec()));
        }
        Ok(())
    }
}

impl<T: AtomicAccumulate> LinearOperator<T> for BlockOperator {
    fn ishape(&self) -> &[usize] {
        self.geom.shape()
    }

    fn oshape(&self) -> &[usize] {
        &self.oshape
    }

    fn apply(&self, x: &StridedView<'_, T>, ctx: &ExecutionContext) -> Result<StridedArray<T>> {
        Self::check_shape(self.geom.shape(), x.dims())?;
        array_to_blocks(x, self.geom.block_shape(), self.geom.block_stride(), ctx)
    }

    fn apply_adjoint(&self, y: &StridedView<'_, T>, ctx: &ExecutionContext) -> Result<StridedArray<T>> {
        Self::check_shape(&self.oshape, y.dims())?;
        blocks_to_array(
            y,
            self.geom.shape(),
            self.geom.block_shape(),
            self.geom.block_stride(),
            ctx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;

    #[test]
    fn test_shapes() {
        let op = BlockOperator::new(&[7, 5], &[3, 2], &[2, 1]).unwrap();
        assert_eq!(LinearOperator::<f64>::ishape(&op), &[7, 5]);
        assert_eq!(LinearOperator::<f64>::oshape(&op), &[3, 4, 3, 2]);
        assert_eq!(op.num_blocks(), &[3, 4]);
    }

    #[test]
    fn test_overlap_count_1d() {
        let op = BlockOperator::new(&[6], &[3], &[2]).unwrap();
        let w: StridedArray<f64> = op.overlap_count(&ExecutionContext::sequential()).unwrap();
        assert_eq!(w.data(), &[1.0, 1.0, 2.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_overlap_count_complex_gapped() {
        let op = BlockOperator::new(&[7], &[2], &[3]).unwrap();
        let w: StridedArray<Complex32> = op.overlap_count(&ExecutionContext::sequential()).unwrap();
        let re: Vec<f32> = w.iter().map(|z| z.re).collect();
        assert_eq!(re, vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        assert!(w.iter().all(|z| z.im == 0.0));
    }

    #[test]
    fn test_apply_checks_input_shape() {
        let op = BlockOperator::new(&[6], &[3], &[2]).unwrap();
        let ctx = ExecutionContext::sequential();

        let x = StridedArray::<f64>::zeros(&[5]);
        assert!(matches!(op.apply(&x.view(), &ctx), Err(BlockError::ShapeMismatch(_, _))));

        // Three blocks would be accepted by the free function.
        let y = StridedArray::<f64>::zeros(&[3, 3]);
        assert!(matches!(
            op.apply_adjoint(&y.view(), &ctx),
            Err(BlockError::ShapeMismatch(_, _))
        ));
    }

    #[test]
    fn test_apply_then_adjoint() {
        let op = BlockOperator::new(&[4, 4], &[2, 2], &[2, 2]).unwrap();
        let ctx = ExecutionContext::sequential();
        let x = StridedArray::from_fn(&[4, 4], |idx| (idx[0] * 4 + idx[1]) as f32);
        let blocks = op.apply(&x.view(), &ctx).unwrap();
        assert_eq!(blocks.dims(), LinearOperator::<f32>::oshape(&op));
        let back = op.apply_adjoint(&blocks.view(), &ctx).unwrap();
        assert_eq!(back, x);
    }
}
