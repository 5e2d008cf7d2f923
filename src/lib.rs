//! Overlapping block extraction and overlap-add accumulation for strided arrays.
//!
//! The two operators in this crate are exact adjoints of each other:
//!
//! - [`array_to_blocks`]: split a rank-1/2/3 array of shape `S` into windows of
//!   shape `B` placed every `St` elements, producing a blocked array of shape
//!   `NB ++ B` where `NB_d = (S_d - B_d + St_d) / St_d`.
//! - [`blocks_to_array`]: sum every window of a blocked array back into an
//!   array of shape `S` (overlap-add).
//!
//! Window cells that fall outside the array are zero on extraction and are
//! dropped on accumulation.
//!
//! # Execution
//!
//! Every call takes an explicit [`ExecutionContext`]. The sequential context
//! walks the iteration domain on the calling thread. The parallel context
//! (feature `parallel`, on by default) runs on rayon: extraction hands one
//! block to each task, accumulation either scatters with lock-free atomic adds
//! ([`AccumulateMode::Atomic`]) or gathers every contribution of one output
//! cell in a single task ([`AccumulateMode::Gather`]).
//!
//! Complex values are accumulated atomically by splitting them into their real
//! and imaginary lanes (see [`AtomicAccumulate`]).
//!
//! # Example
//!
//! ```rust
//! use strided_blocks::{array_to_blocks, blocks_to_array, ExecutionContext, StridedArray};
//!
//! let x = StridedArray::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[6]).unwrap();
//! let ctx = ExecutionContext::sequential();
//!
//! let blocks = array_to_blocks(&x.view(), &[3], &[2], &ctx).unwrap();
//! assert_eq!(blocks.dims(), &[2, 3]);
//! assert_eq!(blocks.data(), &[1.0, 2.0, 3.0, 3.0, 4.0, 5.0]);
//!
//! let y = blocks_to_array(&blocks.view(), &[6], &[3], &[2], &ctx).unwrap();
//! assert_eq!(y.data(), &[1.0, 2.0, 6.0, 4.0, 5.0, 0.0]);
//! ```

mod accumulate;
mod atomic;
mod context;
mod extract;
mod geometry;
mod index;
pub mod linop;
mod scalar;
pub mod view;

pub use accumulate::blocks_to_array;
pub use atomic::{AtomicAccumulate, AtomicLane, AtomicStrategy};
pub use context::{AccumulateMode, ExecutionContext, ParallelConfig, MIN_PARALLEL_LEN};
pub use extract::array_to_blocks;
pub use geometry::{coordinate, in_bounds, num_blocks, BlockGeometry, MAX_RANK};
pub use linop::{BlockOperator, LinearOperator};
pub use scalar::BlockScalar;
pub use view::{row_major_strides, StridedArray, StridedView};

/// Errors raised while validating or executing a block operation.
///
/// Every error is raised before the result buffer is touched.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// Rank of an array or configuration tuple disagrees with the block rank.
    #[error("dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// Block rank outside `1..=3`.
    #[error("unsupported rank {0}: only ranks 1, 2 and 3 are supported")]
    UnsupportedRank(usize),

    /// Block size or stride that yields no valid window layout.
    #[error("invalid block configuration on axis {axis}: {reason}")]
    InvalidConfiguration { axis: usize, reason: String },

    /// Array shapes are incompatible for the operation.
    #[error("shape mismatch: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// Stride array length doesn't match dimensions.
    #[error("stride and dims length mismatch")]
    StrideLengthMismatch,

    /// A view would address memory outside its backing slice.
    #[error("offset overflow while computing element position")]
    OffsetOverflow,

    /// The output buffer cannot be reinterpreted as atomic cells.
    #[error("pod cast unsupported: {0}")]
    PodCastUnsupported(&'static str),

    /// A dedicated rayon pool could not be created.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}

/// Result type for block operations.
pub type Result<T> = std::result::Result<T, BlockError>;
