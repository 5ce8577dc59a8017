/// A point-in-time snapshot of a [`ChunkPool`][crate::ChunkPool]'s counters.
///
/// Obtained via [`ChunkPool::stats()`][crate::ChunkPool::stats]. Each field matches the
/// accessor of the same name on the pool.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct PoolStats {
    /// Chunks that have been allocated and not yet released.
    pub live_chunks: usize,

    /// Sum of the sizes requested for all live chunks.
    pub live_bytes: usize,

    /// Blocks in the chain, not counting a cached spare block.
    pub block_count: usize,

    /// Bytes held from the system allocator, headers and any spare block included.
    pub reserved_bytes: usize,

    /// Blocks obtained from the system allocator after the pool was created.
    pub growth_count: usize,
}

impl PoolStats {
    /// Bytes held from the system allocator that are not occupied by the requested sizes of
    /// live chunks. This covers headers, alignment padding, holes left by released chunks
    /// and capacity that has not been carved yet.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::ChunkPool;
    /// use new_zealand::nz;
    ///
    /// let mut pool = ChunkPool::new(nz!(1024), nz!(1024))?;
    /// let ptr = pool.allocate(100)?;
    ///
    /// let stats = pool.stats();
    /// assert_eq!(stats.overhead_bytes(), stats.reserved_bytes - 100);
    ///
    /// // SAFETY: The pointer came from this pool and is released exactly once.
    /// unsafe { pool.release(ptr.as_ptr()) };
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    #[must_use]
    pub fn overhead_bytes(&self) -> usize {
        self.reserved_bytes.saturating_sub(self.live_bytes)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn overhead_is_reserved_minus_live() {
        let stats = PoolStats {
            live_chunks: 2,
            live_bytes: 80,
            block_count: 1,
            reserved_bytes: 1024,
            growth_count: 0,
        };

        assert_eq!(stats.overhead_bytes(), 944);
    }

    #[test]
    fn default_is_all_zero() {
        let stats = PoolStats::default();

        assert_eq!(stats.live_chunks, 0);
        assert_eq!(stats.overhead_bytes(), 0);
    }
}
