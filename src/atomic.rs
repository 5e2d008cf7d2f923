//! Lock-free accumulation into a shared output buffer.
//!
//! Hardware fetch-add exists for integers only, so a floating-point lane is
//! updated with a compare-and-swap loop on its bit pattern. Complex values are
//! never updated as a whole: they are split into two adjacent scalar lanes
//! (real, imaginary), each with its own independent atomic add. Concurrent
//! contributions may interleave between the two lanes, which is harmless
//! because addition commutes per component.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use num_complex::Complex;

use crate::scalar::BlockScalar;
use crate::{BlockError, Result};

/// How an element type is added into shared memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicStrategy {
    /// One atomic add on the element itself.
    Scalar,
    /// Two independent atomic adds on the real and imaginary lanes.
    SplitComplex,
}

/// A floating-point scalar with an atomic add.
pub trait AtomicLane: Copy + Send + Sync + 'static {
    /// Atomic integer cell with the same size as the lane.
    type Cell: Send + Sync;

    /// Reinterpret an exclusively borrowed buffer as atomic cells.
    ///
    /// # Errors
    /// [`BlockError::PodCastUnsupported`] if the buffer is not aligned for the
    /// atomic cell type on this platform.
    fn cells(buf: &mut [Self]) -> Result<&[Self::Cell]>;

    /// Atomically add `value` to the lane stored in `cell`.
    fn fetch_add(cell: &Self::Cell, value: Self);
}

macro_rules! impl_atomic_lane {
    ($float:ty, $cell:ty) => {
        impl AtomicLane for $float {
            type Cell = $cell;

            fn cells(buf: &mut [Self]) -> Result<&[Self::Cell]> {
                cast_cells(buf)
            }

            #[inline]
            fn fetch_add(cell: &Self::Cell, value: Self) {
                // The closure never returns None, so the update always succeeds.
                let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                    Some((<$float>::from_bits(bits) + value).to_bits())
                });
            }
        }
    };
}

impl_atomic_lane!(f32, AtomicU32);
impl_atomic_lane!(f64, AtomicU64);

fn cast_cells<L, C>(buf: &mut [L]) -> Result<&[C]> {
    if std::mem::size_of::<L>() != std::mem::size_of::<C>() {
        return Err(BlockError::PodCastUnsupported(
            "lane and atomic cell sizes differ",
        ));
    }
    if buf.as_ptr() as usize % std::mem::align_of::<C>() != 0 {
        return Err(BlockError::PodCastUnsupported(
            "buffer is not aligned for atomic access",
        ));
    }
    // SAFETY: `L` and `C` have the same size, the pointer is aligned for `C`,
    // and the exclusive borrow of `buf` outlives the returned slice, so every
    // access to this memory goes through the atomic cells.
    Ok(unsafe { std::slice::from_raw_parts(buf.as_mut_ptr() as *const C, buf.len()) })
}

/// The capability "atomic add of `Self`", selected by element type.
pub trait AtomicAccumulate: BlockScalar {
    /// Scalar lane the element is split into.
    type Lane: AtomicLane;
    /// Number of lanes per element.
    const LANES: usize;
    /// Strategy used for this element type.
    const STRATEGY: AtomicStrategy;

    /// View an element buffer as `LANES` consecutive lanes per element.
    fn as_lanes(buf: &mut [Self]) -> Result<&mut [Self::Lane]>;

    /// Calls `f(lane, value)` for each lane of `self`.
    fn for_each_lane(self, f: impl FnMut(usize, Self::Lane));
}

macro_rules! impl_atomic_accumulate_real {
    ($($t:ty),*) => {
        $(
            impl AtomicAccumulate for $t {
                type Lane = $t;
                const LANES: usize = 1;
                const STRATEGY: AtomicStrategy = AtomicStrategy::Scalar;

                #[inline]
                fn as_lanes(buf: &mut [Self]) -> Result<&mut [Self::Lane]> {
                    Ok(buf)
                }

                #[inline]
                fn for_each_lane(self, mut f: impl FnMut(usize, Self::Lane)) {
                    f(0, self);
                }
            }
        )*
    };
}

impl_atomic_accumulate_real!(f32, f64);

impl<L> AtomicAccumulate for Complex<L>
where
    L: AtomicLane + num_traits::Float + bytemuck::Pod,
{
    type Lane = L;
    const LANES: usize = 2;
    const STRATEGY: AtomicStrategy = AtomicStrategy::SplitComplex;

    fn as_lanes(buf: &mut [Self]) -> Result<&mut [L]> {
        bytemuck::try_cast_slice_mut(buf).map_err(|_| {
            BlockError::PodCastUnsupported("complex buffer cannot be viewed as scalar lanes")
        })
    }

    #[inline]
    fn for_each_lane(self, mut f: impl FnMut(usize, L)) {
        f(0, self.re);
        f(1, self.im);
    }
}

/// Shared handle for concurrent adds into one output buffer.
#[cfg_attr(not(any(test, feature = "parallel")), allow(dead_code))]
pub(crate) struct AtomicSink<'a, T: AtomicAccumulate> {
    cells: &'a [<T::Lane as AtomicLane>::Cell],
    _elem: PhantomData<fn(T)>,
}

#[cfg_attr(not(any(test, feature = "parallel")), allow(dead_code))]
impl<'a, T: AtomicAccumulate> AtomicSink<'a, T> {
    pub(crate) fn new(buf: &'a mut [T]) -> Result<Self> {
        let lanes = T::as_lanes(buf)?;
        let cells = <T::Lane as AtomicLane>::cells(lanes)?;
        Ok(Self {
            cells,
            _elem: PhantomData,
        })
    }

    /// Atomically add `value` to element `index`.
    #[inline]
    pub(crate) fn add(&self, index: usize, value: T) {
        let base = index * T::LANES;
        value.for_each_lane(|lane, x| {
            <T::Lane as AtomicLane>::fetch_add(&self.cells[base + lane], x)
        });
    }
}
