//! Dynamic-rank array storage used at the operator boundary.
//!
//! - [`StridedView`]: borrowed read-only view with arbitrary element strides
//! - [`StridedArray`]: owned row-major array, the result type of every operator

use std::ops::{Index, IndexMut};
use std::sync::Arc;

use num_traits::Zero;

use crate::index::increment;
use crate::{BlockError, Result};

// ============================================================================
// Validation helpers
// ============================================================================

/// Validate that all accessed offsets stay within `[0, len)`.
fn validate_bounds(len: usize, dims: &[usize], strides: &[isize], offset: isize) -> Result<()> {
    if dims.len() != strides.len() {
        return Err(BlockError::StrideLengthMismatch);
    }
    if dims.iter().any(|&d| d == 0) {
        return Ok(());
    }
    let mut min_offset = offset;
    let mut max_offset = offset;
    for (&dim, &stride) in dims.iter().zip(strides.iter()) {
        if dim > 1 {
            let end = stride
                .checked_mul(dim as isize - 1)
                .ok_or(BlockError::OffsetOverflow)?;
            if end >= 0 {
                max_offset = max_offset
                    .checked_add(end)
                    .ok_or(BlockError::OffsetOverflow)?;
            } else {
                min_offset = min_offset
                    .checked_add(end)
                    .ok_or(BlockError::OffsetOverflow)?;
            }
        }
    }
    if min_offset < 0 || max_offset < 0 {
        return Err(BlockError::OffsetOverflow);
    }
    if max_offset as usize >= len {
        return Err(BlockError::OffsetOverflow);
    }
    Ok(())
}

/// Compute row-major strides (last index varies fastest).
pub fn row_major_strides(dims: &[usize]) -> Vec<isize> {
    let rank = dims.len();
    if rank == 0 {
        return vec![];
    }
    let mut strides = vec![1isize; rank];
    for i in (0..rank - 1).rev() {
        strides[i] = strides[i + 1] * dims[i + 1] as isize;
    }
    strides
}

// ============================================================================
// StridedView
// ============================================================================

/// Dynamic-rank immutable strided view.
///
/// Strides are in elements and may be negative, so permuted or reversed
/// layouts can be fed to the block operators without a copy.
pub struct StridedView<'a, T> {
    data: &'a [T],
    dims: Arc<[usize]>,
    strides: Arc<[isize]>,
    offset: isize,
}

impl<T> Clone for StridedView<'_, T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data,
            dims: self.dims.clone(),
            strides: self.strides.clone(),
            offset: self.offset,
        }
    }
}

impl<T> std::fmt::Debug for StridedView<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StridedView")
            .field("dims", &self.dims)
            .field("strides", &self.strides)
            .field("offset", &self.offset)
            .finish()
    }
}

impl<'a, T> StridedView<'a, T> {
    /// Create a new strided view from a borrowed slice.
    ///
    /// # Errors
    /// Returns an error if any index combination would fall outside `data`.
    pub fn new(data: &'a [T], dims: &[usize], strides: &[isize], offset: isize) -> Result<Self> {
        validate_bounds(data.len(), dims, strides, offset)?;
        Ok(Self {
            data,
            dims: Arc::from(dims),
            strides: Arc::from(strides),
            offset,
        })
    }

    /// Row-major view over a contiguous slice.
    pub fn row_major(data: &'a [T], dims: &[usize]) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(BlockError::ShapeMismatch(vec![data.len()], vec![expected]));
        }
        Self::new(data, dims, &row_major_strides(dims), 0)
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    #[inline]
    pub fn offset(&self) -> isize {
        self.offset
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    /// Permute dimensions.
    pub fn permute(&self, perm: &[usize]) -> Result<StridedView<'a, T>> {
        let rank = self.dims.len();
        if perm.len() != rank {
            return Err(BlockError::DimensionMismatch {
                what: "permutation",
                expected: rank,
                found: perm.len(),
            });
        }
        let mut seen = vec![false; rank];
        for &p in perm {
            if p >= rank || seen[p] {
                return Err(BlockError::ShapeMismatch(perm.to_vec(), self.dims.to_vec()));
            }
            seen[p] = true;
        }
        let new_dims: Vec<usize> = perm.iter().map(|&p| self.dims[p]).collect();
        let new_strides: Vec<isize> = perm.iter().map(|&p| self.strides[p]).collect();
        Ok(StridedView {
            data: self.data,
            dims: Arc::from(new_dims),
            strides: Arc::from(new_strides),
            offset: self.offset,
        })
    }

    /// Element offset of `indices` relative to the view origin.
    #[inline]
    pub(crate) fn linear_offset(&self, indices: &[usize]) -> isize {
        indices
            .iter()
            .zip(self.strides.iter())
            .map(|(&i, &s)| i as isize * s)
            .sum()
    }
}

impl<T: Copy> StridedView<'_, T> {
    /// Get an element by multi-dimensional index.
    pub fn get(&self, indices: &[usize]) -> T {
        assert_eq!(indices.len(), self.dims.len(), "wrong number of indices");
        for (i, &index) in indices.iter().enumerate() {
            assert!(
                index < self.dims[i],
                "index {} out of bounds for dim {}",
                index,
                self.dims[i]
            );
        }
        self.at(self.linear_offset(indices))
    }

    /// Read the element `linear` elements away from the view origin.
    ///
    /// `linear` must come from [`Self::linear_offset`] of an in-bounds index.
    #[inline]
    pub(crate) fn at(&self, linear: isize) -> T {
        self.data[(self.offset + linear) as usize]
    }
}

// ============================================================================
// StridedArray
// ============================================================================

/// Owned row-major multidimensional array.
#[derive(Clone, PartialEq)]
pub struct StridedArray<T> {
    data: Vec<T>,
    dims: Arc<[usize]>,
}

impl<T> std::fmt::Debug for StridedArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StridedArray")
            .field("dims", &self.dims)
            .finish()
    }
}

impl<T: Clone + Zero> StridedArray<T> {
    /// Create a zero-filled array.
    pub fn zeros(dims: &[usize]) -> Self {
        let total: usize = dims.iter().product();
        Self {
            data: vec![T::zero(); total],
            dims: Arc::from(dims),
        }
    }
}

impl<T> StridedArray<T> {
    /// Create an array with values produced by a function.
    ///
    /// The function is called with indices in row-major iteration order.
    pub fn from_fn(dims: &[usize], mut f: impl FnMut(&[usize]) -> T) -> Self {
        let total: usize = dims.iter().product();
        let mut data = Vec::with_capacity(total);
        let mut idx = vec![0usize; dims.len()];
        for _ in 0..total {
            data.push(f(&idx));
            increment(&mut idx, dims);
        }
        Self {
            data,
            dims: Arc::from(dims),
        }
    }

    /// Wrap row-major data.
    ///
    /// # Errors
    /// Returns [`BlockError::ShapeMismatch`] if `data.len()` is not the product of `dims`.
    pub fn from_vec(data: Vec<T>, dims: &[usize]) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(BlockError::ShapeMismatch(vec![data.len()], vec![expected]));
        }
        Ok(Self {
            data,
            dims: Arc::from(dims),
        })
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn strides(&self) -> Vec<isize> {
        row_major_strides(&self.dims)
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Create an immutable view over this array.
    pub fn view(&self) -> StridedView<'_, T> {
        StridedView {
            data: &self.data,
            dims: self.dims.clone(),
            strides: Arc::from(row_major_strides(&self.dims)),
            offset: 0,
        }
    }

    /// Iterate over all elements in memory order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    fn position(&self, indices: &[usize]) -> usize {
        assert_eq!(indices.len(), self.dims.len(), "wrong number of indices");
        let mut pos = 0usize;
        for (i, &index) in indices.iter().enumerate() {
            assert!(
                index < self.dims[i],
                "index {} out of bounds for dim {}",
                index,
                self.dims[i]
            );
            pos = pos * self.dims[i] + index;
        }
        pos
    }
}

impl<T: Copy> StridedArray<T> {
    /// Get an element by multi-dimensional index.
    pub fn get(&self, indices: &[usize]) -> T {
        self.data[self.position(indices)]
    }

    /// Set an element by multi-dimensional index.
    pub fn set(&mut self, indices: &[usize], value: T) {
        let pos = self.position(indices);
        self.data[pos] = value;
    }
}

impl<T> Index<&[usize]> for StridedArray<T> {
    type Output = T;

    fn index(&self, indices: &[usize]) -> &T {
        &self.data[self.position(indices)]
    }
}

impl<T> IndexMut<&[usize]> for StridedArray<T> {
    fn index_mut(&mut self, indices: &[usize]) -> &mut T {
        let pos = self.position(indices);
        &mut self.data[pos]
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    #[test]
    fn test_row_major_strides() {
        assert_eq!(row_major_strides(&[3, 4]), vec![4, 1]);
        assert_eq!(row_major_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert!(row_major_strides(&[]).is_empty());
    }

    #[test]
    fn test_strided_view_get() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = StridedView::<f64>::new(&data, &[2, 3], &[3, 1], 0).unwrap();
        assert_eq!(view.ndim(), 2);
        assert_eq!(view.len(), 6);
        assert_eq!(view.get(&[0, 0]), 1.0);
        assert_eq!(view.get(&[0, 2]), 3.0);
        assert_eq!(view.get(&[1, 0]), 4.0);
        assert_eq!(view.get(&[1, 2]), 6.0);
    }

    #[test]
    fn test_strided_view_negative_stride() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let view = StridedView::<f64>::new(&data, &[4], &[-1], 3).unwrap();
        assert_eq!(view.get(&[0]), 4.0);
        assert_eq!(view.get(&[3]), 1.0);
    }

    #[test]
    fn test_strided_view_out_of_bounds() {
        let data = vec![0.0; 5];
        assert!(matches!(
            StridedView::<f64>::new(&data, &[2, 3], &[3, 1], 0),
            Err(BlockError::OffsetOverflow)
        ));
        assert!(matches!(
            StridedView::<f64>::new(&data, &[2, 3], &[1], 0),
            Err(BlockError::StrideLengthMismatch)
        ));
    }

    #[test]
    fn test_strided_view_permute() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let view = StridedView::<f64>::row_major(&data, &[2, 3]).unwrap();
        let perm = view.permute(&[1, 0]).unwrap();
        assert_eq!(perm.dims(), &[3, 2]);
        assert_eq!(perm.strides(), &[1, 3]);
        assert_eq!(perm.get(&[1, 0]), 2.0);
        assert_eq!(perm.get(&[0, 1]), 4.0);
        assert!(view.permute(&[0, 0]).is_err());
    }

    #[test]
    fn test_strided_array_from_fn_row_major() {
        let t = StridedArray::<f64>::from_fn(&[2, 3], |idx| (idx[0] * 3 + idx[1]) as f64);
        assert_eq!(t.dims(), &[2, 3]);
        assert_eq!(t.strides(), vec![3, 1]);
        assert_eq!(t.data(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(t.get(&[1, 2]), 5.0);
        assert_eq!(t[&[0, 1][..]], 1.0);
    }

    #[test]
    fn test_strided_array_set_and_view() {
        let mut t = StridedArray::<Complex64>::zeros(&[2, 2]);
        t.set(&[1, 0], Complex64::new(1.0, -1.0));
        t[&[0, 1][..]] = Complex64::new(2.0, 0.5);
        let v = t.view();
        assert_eq!(v.get(&[1, 0]), Complex64::new(1.0, -1.0));
        assert_eq!(v.get(&[0, 1]), Complex64::new(2.0, 0.5));
    }

    #[test]
    fn test_strided_array_from_vec_length_check() {
        assert!(StridedArray::from_vec(vec![1.0f32; 5], &[2, 3]).is_err());
        let t = StridedArray::from_vec(vec![1.0f32; 6], &[2, 3]).unwrap();
        assert_eq!(t.len(), 6);
        assert_eq!(t.into_vec().len(), 6);
    }
}
