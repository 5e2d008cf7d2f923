//! Element type bounds for block operations.

/// Shared trait bounds for all element types the block operators move.
///
/// Extraction only copies values, so any `Copy + Zero` type that can cross
/// threads qualifies. Accumulation additionally needs [`crate::AtomicAccumulate`].
pub trait BlockScalar:
    Copy + Send + Sync + std::ops::Add<Output = Self> + num_traits::Zero + PartialEq + 'static
{
}

impl<T> BlockScalar for T where
    T: Copy + Send + Sync + std::ops::Add<Output = T> + num_traits::Zero + PartialEq + 'static
{
}
