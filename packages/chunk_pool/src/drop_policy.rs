/// Determines what happens when a [`ChunkPool`][crate::ChunkPool] is dropped while some of its
/// chunks have not been released.
///
/// Blocks that still hold live chunks are never freed when the pool is dropped. The pool cannot
/// know whether the outstanding pointers are still in use elsewhere, so it leaks those blocks
/// instead of turning the pointers into dangling ones. The policy only decides whether the
/// situation is reported by panicking.
///
/// # Examples
///
/// ```
/// use chunk_pool::{ChunkPool, DropPolicy};
///
/// let pool = ChunkPool::builder()
///     .drop_policy(DropPolicy::MustNotLeakChunks)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Debug builds panic if chunks are still live when the pool is dropped. Release builds
    /// leak the affected blocks and emit a warning. This is the default.
    #[default]
    DebugAssertEmpty,

    /// The pool leaks the affected blocks and emits a warning in all builds.
    ///
    /// This may be appropriate if chunks are intentionally handed off to code that outlives
    /// the pool and never returns them.
    MayLeakChunks,

    /// The pool panics in all builds if chunks are still live when it is dropped.
    MustNotLeakChunks,
}

impl DropPolicy {
    /// Whether dropping a pool with live chunks must panic under this policy.
    #[must_use]
    pub(crate) fn panics_on_leak(self) -> bool {
        match self {
            Self::DebugAssertEmpty => cfg!(debug_assertions),
            Self::MayLeakChunks => false,
            Self::MustNotLeakChunks => true,
        }
    }
}
