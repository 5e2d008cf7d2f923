//! Explicit execution context passed to every operator call.
//!
//! There is no ambient "current device": callers choose sequential or
//! data-parallel execution per call. Small problems fall back to the
//! sequential traversal, matching the threading threshold used by the
//! strided map/reduce kernels.

#[cfg(feature = "parallel")]
use std::sync::Arc;

#[cfg(feature = "parallel")]
use crate::Result;

/// Minimum iteration-domain size that justifies multi-threaded execution.
pub const MIN_PARALLEL_LEN: usize = 1 << 15;

/// Race-avoidance strategy for parallel accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulateMode {
    /// One task per block; overlapping writes use lock-free atomic adds.
    #[default]
    Atomic,
    /// One task per output cell summing every window that covers it.
    ///
    /// Needs no atomics and sums in the same order as the sequential
    /// traversal, so results are bitwise reproducible.
    Gather,
}

/// Tuning for the data-parallel traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelConfig {
    /// Domains with at most this many cells run sequentially.
    pub min_len: usize,
    /// Accumulation strategy.
    pub accumulate: AccumulateMode,
    /// Dedicated pool size; `None` uses the global rayon pool.
    ///
    /// The pool is built and torn down on every operator call. Callers that
    /// apply an operator repeatedly should hand in a shared pool with
    /// `ExecutionContext::with_thread_pool` instead.
    pub num_threads: Option<usize>,
    #[cfg(feature = "parallel")]
    pool: Option<SharedPool>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            min_len: MIN_PARALLEL_LEN,
            accumulate: AccumulateMode::default(),
            num_threads: None,
            #[cfg(feature = "parallel")]
            pool: None,
        }
    }
}

/// A caller-owned rayon pool, compared by identity.
#[cfg(feature = "parallel")]
#[derive(Clone)]
struct SharedPool(Arc<rayon::ThreadPool>);

#[cfg(feature = "parallel")]
impl PartialEq for SharedPool {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(feature = "parallel")]
impl Eq for SharedPool {}

#[cfg(feature = "parallel")]
impl std::fmt::Debug for SharedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPool")
            .field("num_threads", &self.0.current_num_threads())
            .finish()
    }
}

/// Where and how an operator call runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExecutionContext {
    /// Single-threaded traversal on the calling thread.
    #[default]
    Sequential,
    /// Data-parallel traversal on rayon.
    ///
    /// Without the `parallel` feature this behaves like `Sequential`.
    Parallel(ParallelConfig),
}

/// Traversal picked for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(not(feature = "parallel"), allow(dead_code))]
pub(crate) enum Traversal {
    Sequential,
    Parallel(AccumulateMode),
}

impl ExecutionContext {
    pub fn sequential() -> Self {
        ExecutionContext::Sequential
    }

    /// Parallel context with default [`ParallelConfig`].
    pub fn parallel() -> Self {
        ExecutionContext::Parallel(ParallelConfig::default())
    }

    /// Set the sequential-fallback threshold. No effect on `Sequential`.
    pub fn with_min_len(mut self, min_len: usize) -> Self {
        if let ExecutionContext::Parallel(cfg) = &mut self {
            cfg.min_len = min_len;
        }
        self
    }

    /// Set the accumulation strategy. No effect on `Sequential`.
    pub fn with_accumulate(mut self, mode: AccumulateMode) -> Self {
        if let ExecutionContext::Parallel(cfg) = &mut self {
            cfg.accumulate = mode;
        }
        self
    }

    /// Run on a dedicated pool of `n` threads. No effect on `Sequential`.
    pub fn with_num_threads(mut self, n: usize) -> Self {
        if let ExecutionContext::Parallel(cfg) = &mut self {
            cfg.num_threads = Some(n);
        }
        self
    }

    /// Run on a caller-owned pool, reused across calls.
    ///
    /// Takes precedence over [`with_num_threads`](Self::with_num_threads).
    /// No effect on `Sequential`.
    #[cfg(feature = "parallel")]
    pub fn with_thread_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        if let ExecutionContext::Parallel(cfg) = &mut self {
            cfg.pool = Some(SharedPool(pool));
        }
        self
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, ExecutionContext::Parallel(_))
    }

    /// Pick the traversal for an iteration domain of `work` cells.
    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    pub(crate) fn plan(&self, work: usize) -> Traversal {
        match self {
            ExecutionContext::Parallel(cfg) if cfg!(feature = "parallel") && work > cfg.min_len => {
                Traversal::Parallel(cfg.accumulate)
            }
            _ => Traversal::Sequential,
        }
    }

    /// Run `op` inside this context's thread pool.
    #[cfg(feature = "parallel")]
    pub(crate) fn install<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let cfg = match self {
            ExecutionContext::Parallel(cfg) => cfg,
            ExecutionContext::Sequential => return Ok(op()),
        };
        if let Some(SharedPool(pool)) = &cfg.pool {
            return Ok(pool.install(op));
        }
        match cfg.num_threads {
            Some(n) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|e| crate::BlockError::ThreadPool(e.to_string()))?;
                Ok(pool.install(op))
            }
            None => Ok(op()),
        }
    }
}
