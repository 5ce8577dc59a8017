use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tracing::{debug, trace, warn};

use crate::{
    Block, ChunkHeader, ChunkPoolBuilder, DropPolicy, Error, MAX_ALIGN, PoolStats, Result,
    chunk_footprint,
};

/// Global counter for generating unique pool IDs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique pool ID.
fn generate_pool_id() -> u64 {
    POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A single-threaded pool allocator for many small, short-lived allocations.
///
/// The pool owns a chain of memory blocks obtained from the system allocator. Each call to
/// [`allocate()`](Self::allocate) bump-carves a chunk from the most recently appended block,
/// appending a new block when that one has no room left. Each call to
/// [`release()`](Self::release) returns a chunk to the block it was carved from; once every
/// chunk of a block has been released, the block leaves the chain.
///
/// Space inside a block is never reused while any chunk of that block is live. This trades
/// holes for speed: allocation and release are both constant time, whatever order chunks
/// are released in.
///
/// # Block retention
///
/// * The first block (allocated eagerly at construction with the preallocation size) is never
///   freed. When it empties, it is reset and its full capacity becomes available again.
/// * One emptied growth block is cached as a spare and reused by the next growth event
///   instead of going back to the system allocator. This keeps a single allocation
///   oscillating across a block boundary from hitting the system allocator every time. It
///   can be disabled via [`ChunkPoolBuilder::retain_spare_block()`] and released on demand
///   via [`shrink_to_fit()`](Self::shrink_to_fit).
///
/// # Example
///
/// ```rust
/// use std::num::NonZero;
///
/// use chunk_pool::ChunkPool;
///
/// let mut pool = ChunkPool::new(NonZero::new(4096).unwrap(), NonZero::new(4096).unwrap())?;
///
/// let ptr = pool.allocate(40)?;
///
/// // SAFETY: The chunk is at least 40 bytes long and suitably aligned for u64.
/// unsafe {
///     ptr.cast::<u64>().write(1234);
///     assert_eq!(ptr.cast::<u64>().read(), 1234);
/// }
///
/// assert_eq!(pool.len(), 1);
///
/// // SAFETY: The pointer came from this pool and is released exactly once.
/// unsafe { pool.release(ptr.as_ptr()) };
///
/// assert!(pool.is_empty());
/// # Ok::<(), chunk_pool::Error>(())
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) and can be moved between threads, but it is not
/// thread-safe ([`Sync`]). There is no internal synchronization; callers sharing one pool
/// across threads must provide their own.
#[derive(Debug)]
pub struct ChunkPool {
    /// Uniquely identifies the pool. Debug builds record it in every chunk header to detect
    /// chunks being released to the wrong pool.
    pool_id: u64,

    prealloc_bytes: NonZero<usize>,
    growth_bytes: NonZero<usize>,

    /// The preallocated block. Always first in the chain and never freed before the pool.
    head: Block,

    /// The most recently appended block, the only one chunks are carved from.
    tail: Block,

    /// An emptied growth block kept for reuse by the next growth event.
    spare: Option<Block>,

    retain_spare_block: bool,
    drop_policy: DropPolicy,

    /// Number of chunks handed out and not yet released.
    live_chunks: usize,

    /// Sum of the requested sizes of all live chunks.
    live_bytes: usize,

    /// Number of blocks in the chain, the spare not included.
    block_count: usize,

    /// Bytes currently obtained from the system allocator, spare and headers included.
    reserved_bytes: usize,

    /// Number of blocks obtained from the system allocator after construction.
    growth_count: usize,
}

impl ChunkPool {
    /// Creates a builder for configuring and constructing a [`ChunkPool`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::ChunkPool;
    /// use new_zealand::nz;
    ///
    /// let pool = ChunkPool::builder()
    ///     .prealloc_bytes(nz!(65536))
    ///     .growth_bytes(nz!(16384))
    ///     .build()?;
    ///
    /// assert_eq!(pool.block_count(), 1);
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    #[inline]
    pub fn builder() -> ChunkPoolBuilder {
        ChunkPoolBuilder::new()
    }

    /// Creates a pool that reserves `prealloc_bytes` of chunk capacity immediately and grows
    /// in blocks of `growth_bytes` once that is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the system allocator cannot provide the first block,
    /// or [`Error::SizeOverflow`] if `prealloc_bytes` cannot be described by a memory layout.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::ChunkPool;
    /// use new_zealand::nz;
    ///
    /// let pool = ChunkPool::new(nz!(10240), nz!(10240))?;
    ///
    /// assert!(pool.is_empty());
    /// assert_eq!(pool.block_count(), 1);
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    pub fn new(prealloc_bytes: NonZero<usize>, growth_bytes: NonZero<usize>) -> Result<Self> {
        Self::builder()
            .prealloc_bytes(prealloc_bytes)
            .growth_bytes(growth_bytes)
            .build()
    }

    /// Creates a new [`ChunkPool`] with the specified configuration.
    ///
    /// This method is used internally by the builder to construct the actual pool.
    pub(crate) fn new_inner(
        prealloc_bytes: NonZero<usize>,
        growth_bytes: NonZero<usize>,
        retain_spare_block: bool,
        drop_policy: DropPolicy,
    ) -> Result<Self> {
        let head = Block::allocate(prealloc_bytes.get())?;
        let pool_id = generate_pool_id();

        debug!(
            pool_id,
            prealloc_bytes = prealloc_bytes.get(),
            growth_bytes = growth_bytes.get(),
            "chunk pool created"
        );

        Ok(Self {
            pool_id,
            prealloc_bytes,
            growth_bytes,
            head,
            tail: head,
            spare: None,
            retain_spare_block,
            drop_policy,
            live_chunks: 0,
            live_bytes: 0,
            block_count: 1,
            reserved_bytes: head.size(),
            growth_count: 0,
        })
    }

    /// The chunk capacity reserved when the pool was created.
    #[must_use]
    #[inline]
    pub fn prealloc_bytes(&self) -> NonZero<usize> {
        self.prealloc_bytes
    }

    /// The chunk capacity of each block appended when the pool runs out of room.
    #[must_use]
    #[inline]
    pub fn growth_bytes(&self) -> NonZero<usize> {
        self.growth_bytes
    }

    /// The number of chunks that have been allocated and not yet released.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::ChunkPool;
    /// use new_zealand::nz;
    ///
    /// let mut pool = ChunkPool::new(nz!(1024), nz!(1024))?;
    /// assert_eq!(pool.len(), 0);
    ///
    /// let a = pool.allocate(8)?;
    /// let b = pool.allocate(8)?;
    /// assert_eq!(pool.len(), 2);
    ///
    /// // SAFETY: Both pointers came from this pool and are released exactly once.
    /// unsafe {
    ///     pool.release(a.as_ptr());
    ///     pool.release(b.as_ptr());
    /// }
    /// assert_eq!(pool.len(), 0);
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.live_chunks
    }

    /// Whether every allocated chunk has been released.
    ///
    /// An empty pool still holds at least one block of reserved memory.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live_chunks == 0
    }

    /// The sum of the sizes requested for all live chunks.
    ///
    /// This excludes headers and alignment padding.
    #[must_use]
    #[inline]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// The number of blocks in the chain. Never less than one.
    ///
    /// A cached spare block is not part of the chain and is not counted here.
    #[must_use]
    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// The total number of bytes the pool currently holds from the system allocator,
    /// including block headers and any cached spare block.
    #[must_use]
    #[inline]
    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }

    /// The number of blocks obtained from the system allocator since the pool was created,
    /// not counting the preallocated block.
    ///
    /// Reusing the cached spare block is not a growth event.
    #[must_use]
    #[inline]
    pub fn growth_count(&self) -> usize {
        self.growth_count
    }

    /// Whether an emptied growth block is cached for reuse.
    #[must_use]
    #[inline]
    pub fn has_spare_block(&self) -> bool {
        self.spare.is_some()
    }

    /// A snapshot of the pool's counters.
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
    /// assert_eq!(stats.live_chunks, 1);
    /// assert_eq!(stats.live_bytes, 100);
    /// assert_eq!(stats.block_count, 1);
    ///
    /// // SAFETY: The pointer came from this pool and is released exactly once.
    /// unsafe { pool.release(ptr.as_ptr()) };
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live_chunks: self.live_chunks,
            live_bytes: self.live_bytes,
            block_count: self.block_count,
            reserved_bytes: self.reserved_bytes,
            growth_count: self.growth_count,
        }
    }

    /// Allocates a chunk of at least `size` bytes, aligned to [`MAX_ALIGN`].
    ///
    /// The chunk is carved from the tail of the most recently appended block. If that block
    /// does not have room, a new block is appended first: the cached spare block if it is
    /// large enough, otherwise a block of [`growth_bytes()`](Self::growth_bytes) obtained from
    /// the system allocator, or a dedicated block sized to fit if the request alone exceeds
    /// the growth size.
    ///
    /// A zero-size request yields a unique chunk of the minimum size.
    ///
    /// The contents of the chunk are uninitialized. The chunk must eventually be returned via
    /// [`release()`](Self::release).
    ///
    /// # Errors
    ///
    /// Returns [`Error::SizeOverflow`] if the request cannot be described by a memory layout
    /// and [`Error::OutOfMemory`] if the system allocator cannot provide a new block. The pool
    /// is unchanged when an error is returned.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::{ChunkPool, MAX_ALIGN};
    /// use new_zealand::nz;
    ///
    /// let mut pool = ChunkPool::new(nz!(1024), nz!(1024))?;
    ///
    /// let ptr = pool.allocate(24)?;
    /// assert_eq!(ptr.as_ptr().addr() % MAX_ALIGN, 0);
    ///
    /// // SAFETY: The pointer came from this pool and is released exactly once.
    /// unsafe { pool.release(ptr.as_ptr()) };
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        let footprint = chunk_footprint(size).ok_or(Error::SizeOverflow { requested: size })?;

        let (block, chunk_start) = match self.tail.try_carve(footprint) {
            Some(chunk_start) => (self.tail, chunk_start),
            None => {
                let block = self.grow(footprint, size)?;
                let chunk_start = block
                    .try_carve(footprint)
                    .expect("a block appended for a request always has room for it");
                (block, chunk_start)
            }
        };

        // Cannot overflow because every live chunk occupies at least one byte of memory.
        self.live_chunks = self.live_chunks.wrapping_add(1);

        // Cannot overflow because every live chunk occupies at least its requested size.
        self.live_bytes = self.live_bytes.wrapping_add(size);

        // First chunk in a freshly appended block.
        #[cfg(debug_assertions)]
        if block != self.head && block.live_chunks() == 1 {
            self.integrity_check();
        }

        // SAFETY: try_carve() returned a MAX_ALIGN-aligned region of `footprint` bytes, which
        // chunk_footprint() sized to hold the header followed by `size` bytes.
        Ok(unsafe { ChunkHeader::new(block, size, self.pool_id).write_at(chunk_start) })
    }

    /// Allocates a chunk suitable for a value with the given memory layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedAlignment`] if the layout requires a stricter alignment
    /// than [`MAX_ALIGN`]. Otherwise fails under the same conditions as
    /// [`allocate()`](Self::allocate).
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::alloc::Layout;
    ///
    /// use chunk_pool::ChunkPool;
    /// use new_zealand::nz;
    ///
    /// let mut pool = ChunkPool::new(nz!(1024), nz!(1024))?;
    ///
    /// let ptr = pool.allocate_layout(Layout::new::<[u64; 4]>())?;
    ///
    /// // SAFETY: The pointer came from this pool and is released exactly once.
    /// unsafe { pool.release(ptr.as_ptr()) };
    ///
    /// // Over-aligned layouts are rejected.
    /// let over_aligned = Layout::from_size_align(64, 64).unwrap();
    /// assert!(pool.allocate_layout(over_aligned).is_err());
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    pub fn allocate_layout(&mut self, layout: Layout) -> Result<NonNull<u8>> {
        if layout.align() > MAX_ALIGN {
            return Err(Error::UnsupportedAlignment {
                align: layout.align(),
                max_align: MAX_ALIGN,
            });
        }

        self.allocate(layout.size())
    }

    /// Returns a chunk to the pool.
    ///
    /// Passing a null pointer does nothing.
    ///
    /// If this was the last live chunk of its block, the block is reset (if it is the
    /// preallocated block), cached as the spare, or returned to the system allocator.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the chunk was already released or was allocated by a
    /// different pool. Release builds do not check.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer returned by [`allocate()`](Self::allocate) or
    /// [`allocate_layout()`](Self::allocate_layout) on this pool that has not been released
    /// yet. The chunk's memory must not be accessed after this call.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        // SAFETY: The caller guarantees the pointer came from allocate() on this pool and has
        // not been released, so its block is still allocated and the header is intact.
        let mut header_ptr = unsafe { ChunkHeader::of(ptr) };

        // SAFETY: As above. No other reference to the header exists because headers are
        // only accessed by the pool, which we hold exclusively.
        let header = unsafe { header_ptr.as_mut() };

        #[cfg(debug_assertions)]
        header.mark_released(self.pool_id);

        let block = header.block();
        let size = header.size();

        self.live_chunks = self
            .live_chunks
            .checked_sub(1)
            .expect("released a chunk while the pool has no live chunks");

        self.live_bytes = self
            .live_bytes
            .checked_sub(size)
            .expect("released more bytes than the pool has live");

        if block.release_chunk() {
            self.reclaim(block);
        }
    }

    /// Releases the cached spare block, if any, back to the system allocator.
    ///
    /// Blocks holding live chunks and the preallocated block are not affected.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::ChunkPool;
    /// use new_zealand::nz;
    ///
    /// let mut pool = ChunkPool::new(nz!(64), nz!(64))?;
    ///
    /// // Fill the first block and force a second one.
    /// let a = pool.allocate(32)?;
    /// let b = pool.allocate(32)?;
    /// assert_eq!(pool.block_count(), 2);
    ///
    /// // SAFETY: The pointer came from this pool and is released exactly once.
    /// unsafe { pool.release(b.as_ptr()) };
    /// assert!(pool.has_spare_block());
    ///
    /// pool.shrink_to_fit();
    /// assert!(!pool.has_spare_block());
    ///
    /// // SAFETY: The pointer came from this pool and is released exactly once.
    /// unsafe { pool.release(a.as_ptr()) };
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    pub fn shrink_to_fit(&mut self) {
        if let Some(spare) = self.spare.take() {
            self.free_block(spare);
        }
    }

    /// Appends a block with room for a chunk of `footprint` bytes to the chain and returns it.
    fn grow(&mut self, footprint: usize, requested: usize) -> Result<Block> {
        let block = match self.spare.take() {
            Some(spare) if spare.capacity() >= footprint => {
                trace!(pool_id = self.pool_id, "reusing spare block");
                spare
            }
            spare => {
                self.spare = spare;

                let capacity = footprint.max(self.growth_bytes.get());
                let block = Block::allocate(capacity).map_err(|error| match error {
                    Error::SizeOverflow { .. } => Error::SizeOverflow { requested },
                    other => other,
                })?;

                // Cannot overflow because the total cannot exceed the size of virtual memory.
                self.reserved_bytes = self.reserved_bytes.wrapping_add(block.size());
                self.growth_count = self.growth_count.wrapping_add(1);

                trace!(
                    pool_id = self.pool_id,
                    block_bytes = block.size(),
                    growth_count = self.growth_count,
                    "appended new block"
                );

                block
            }
        };

        block.set_prev(Some(self.tail));
        block.set_next(None);
        self.tail.set_next(Some(block));
        self.tail = block;

        // Cannot overflow because every block occupies memory.
        self.block_count = self.block_count.wrapping_add(1);

        Ok(block)
    }

    /// Handles a block whose last live chunk has just been released.
    fn reclaim(&mut self, block: Block) {
        if block == self.head {
            block.reset();
            return;
        }

        self.unlink(block);

        // Only standard growth blocks are worth caching; oversized blocks were sized for
        // one specific request.
        if self.retain_spare_block && self.spare.is_none() && self.is_standard_growth(block) {
            block.reset();
            block.set_prev(None);
            block.set_next(None);
            self.spare = Some(block);

            trace!(pool_id = self.pool_id, "cached emptied block as spare");
        } else {
            self.free_block(block);
        }

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Whether the block has the capacity `Block::allocate()` produces for a growth event that
    /// was not sized up for an oversized request.
    fn is_standard_growth(&self, block: Block) -> bool {
        self.growth_bytes.get().checked_next_multiple_of(MAX_ALIGN) == Some(block.capacity())
    }

    /// Detaches a block other than the head from the chain.
    fn unlink(&mut self, block: Block) {
        debug_assert_ne!(block, self.head);

        let prev = block
            .prev()
            .expect("every block except the head has a predecessor");
        let next = block.next();

        prev.set_next(next);

        match next {
            Some(next) => next.set_prev(Some(prev)),
            None => self.tail = prev,
        }

        self.block_count = self
            .block_count
            .checked_sub(1)
            .expect("unlinked a block from an empty chain");
    }

    /// Returns a block that is no longer part of the pool to the system allocator.
    fn free_block(&mut self, block: Block) {
        let size = block.size();

        // SAFETY: The block is no longer reachable from the chain or the spare slot and has
        // no live chunks, so nothing will access it again.
        unsafe {
            block.free();
        }

        // Cannot underflow because the block's size was added when it was allocated.
        self.reserved_bytes = self.reserved_bytes.wrapping_sub(size);

        trace!(pool_id = self.pool_id, block_bytes = size, "freed block");
    }

    /// Verifies that the block chain and every counter agree with each other.
    ///
    /// This walks the whole chain, so it is only available in debug builds.
    ///
    /// # Panics
    ///
    /// Panics if any inconsistency is found.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    #[allow(
        clippy::arithmetic_side_effects,
        reason = "integrity check sums counters that the pool already keeps in range"
    )]
    pub(crate) fn integrity_check(&self) {
        assert_eq!(self.head.prev(), None, "head block has a predecessor");
        assert_eq!(self.tail.next(), None, "tail block has a successor");

        let mut observed_blocks = 0_usize;
        let mut observed_live_chunks = 0_usize;
        let mut observed_reserved_bytes = 0_usize;
        let mut previous: Option<Block> = None;
        let mut current = Some(self.head);

        while let Some(block) = current {
            assert_eq!(block.prev(), previous, "block has a broken back-link");
            assert!(
                block.carved() <= block.capacity(),
                "block carved {} bytes beyond its capacity of {}",
                block.carved(),
                block.capacity()
            );
            assert!(
                block == self.head || !block.is_empty(),
                "an empty block other than the head remains in the chain"
            );

            observed_blocks += 1;
            observed_live_chunks += block.live_chunks();
            observed_reserved_bytes += block.size();

            previous = Some(block);
            current = block.next();
        }

        assert_eq!(previous, Some(self.tail), "chain does not end at the tail");
        assert_eq!(observed_blocks, self.block_count, "block count mismatch");
        assert_eq!(
            observed_live_chunks, self.live_chunks,
            "live chunk count mismatch"
        );

        if let Some(spare) = self.spare {
            assert!(spare.is_empty(), "spare block has live chunks");
            assert_eq!(spare.carved(), 0, "spare block was not reset");
            observed_reserved_bytes += spare.size();
        }

        assert_eq!(
            observed_reserved_bytes, self.reserved_bytes,
            "reserved byte count mismatch"
        );
    }
}

impl Drop for ChunkPool {
    fn drop(&mut self) {
        let live_chunks = self.live_chunks;
        let mut leaked_blocks = 0_usize;
        let mut current = Some(self.head);

        while let Some(block) = current {
            current = block.next();

            if block.is_empty() {
                // SAFETY: The pool is going away and the block has no live chunks, so nothing
                // will access it again.
                unsafe {
                    block.free();
                }
            } else {
                // Outstanding pointers may still be in use, so the block stays allocated.
                // Cannot overflow because every block occupies memory.
                leaked_blocks = leaked_blocks.wrapping_add(1);
            }
        }

        if let Some(spare) = self.spare.take() {
            // SAFETY: The spare is not part of the chain and has no live chunks.
            unsafe {
                spare.free();
            }
        }

        if live_chunks == 0 {
            debug!(pool_id = self.pool_id, "chunk pool dropped");
            return;
        }

        warn!(
            pool_id = self.pool_id,
            live_chunks,
            live_bytes = self.live_bytes,
            leaked_blocks,
            "chunk pool dropped with live chunks; their blocks are leaked"
        );

        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if !thread::panicking() && self.drop_policy.panics_on_leak() {
            panic!(
                "dropped a ChunkPool with {live_chunks} live chunks - this is forbidden by {:?}",
                self.drop_policy
            );
        }
    }
}

// SAFETY: ChunkPool contains raw pointers to blocks it exclusively owns. It does not share
// them with other threads and does not rely on thread-local state, so moving the pool to
// another thread is sound. Mutation requires &mut self, so the pool is not Sync.
unsafe impl Send for ChunkPool {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::BLOCK_HEADER_SIZE;
    use crate::chunk::CHUNK_HEADER_SIZE;

    assert_impl_all!(ChunkPool: Send, std::fmt::Debug);
    assert_not_impl_any!(ChunkPool: Sync);

    fn pool(prealloc: NonZero<usize>, growth: NonZero<usize>) -> ChunkPool {
        ChunkPool::new(prealloc, growth).unwrap()
    }

    #[cfg_attr(
        not(debug_assertions),
        expect(unused_variables, reason = "the chain is only walked in debug builds")
    )]
    fn check_integrity(pool: &ChunkPool) {
        #[cfg(debug_assertions)]
        pool.integrity_check();
    }

    #[test]
    fn smoke_test() {
        let mut pool = pool(nz!(1024), nz!(1024));

        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.block_count(), 1);

        let a = pool.allocate(8).unwrap();
        let b = pool.allocate(8).unwrap();
        let c = pool.allocate(8).unwrap();

        unsafe {
            a.cast::<u64>().write(1);
            b.cast::<u64>().write(2);
            c.cast::<u64>().write(3);
        }

        assert_eq!(pool.len(), 3);
        assert_eq!(pool.live_bytes(), 24);

        unsafe { pool.release(b.as_ptr()) };

        unsafe {
            assert_eq!(a.cast::<u64>().read(), 1);
            assert_eq!(c.cast::<u64>().read(), 3);
        }

        unsafe {
            pool.release(a.as_ptr());
            pool.release(c.as_ptr());
        }

        assert!(pool.is_empty());
        assert_eq!(pool.live_bytes(), 0);
        check_integrity(&pool);
    }

    #[test]
    fn construction_reserves_first_block() {
        let pool = pool(nz!(4096), nz!(1024));

        assert_eq!(pool.block_count(), 1);
        assert_eq!(pool.reserved_bytes(), BLOCK_HEADER_SIZE + 4096);
        assert_eq!(pool.growth_count(), 0);
        assert_eq!(pool.prealloc_bytes().get(), 4096);
        assert_eq!(pool.growth_bytes().get(), 1024);
        assert!(!pool.has_spare_block());
    }

    #[test]
    fn chunks_are_aligned_and_disjoint() {
        let mut pool = pool(nz!(4096), nz!(4096));

        let sizes = [1_usize, 3, 16, 17, 40, 100, 0, 255];
        let ptrs: Vec<_> = sizes.iter().map(|&size| pool.allocate(size).unwrap()).collect();

        for (ptr, &size) in ptrs.iter().zip(&sizes) {
            assert_eq!(ptr.as_ptr().addr() % MAX_ALIGN, 0);

            // Fill every chunk entirely; overlapping chunks would corrupt each other.
            unsafe { ptr.as_ptr().write_bytes(size as u8, size) };
        }

        for (ptr, &size) in ptrs.iter().zip(&sizes) {
            for offset in 0..size {
                assert_eq!(unsafe { ptr.as_ptr().add(offset).read() }, size as u8);
            }
        }

        for ptr in ptrs {
            unsafe { pool.release(ptr.as_ptr()) };
        }

        assert!(pool.is_empty());
    }

    #[test]
    fn release_null_is_noop() {
        let mut pool = pool(nz!(256), nz!(256));
        let ptr = pool.allocate(8).unwrap();

        unsafe { pool.release(std::ptr::null_mut()) };

        assert_eq!(pool.len(), 1);

        unsafe { pool.release(ptr.as_ptr()) };
        assert!(pool.is_empty());
    }

    #[test]
    fn zero_size_allocations_are_unique() {
        let mut pool = pool(nz!(256), nz!(256));

        let a = pool.allocate(0).unwrap();
        let b = pool.allocate(0).unwrap();

        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.live_bytes(), 0);

        unsafe {
            pool.release(a.as_ptr());
            pool.release(b.as_ptr());
        }
    }

    #[test]
    fn exhausting_first_block_grows() {
        let footprint = CHUNK_HEADER_SIZE + 32;
        let mut pool = ChunkPool::new(NonZero::new(footprint * 2).unwrap(), nz!(1024)).unwrap();

        let a = pool.allocate(32).unwrap();
        let b = pool.allocate(32).unwrap();
        assert_eq!(pool.block_count(), 1);

        let c = pool.allocate(32).unwrap();
        assert_eq!(pool.block_count(), 2);
        assert_eq!(pool.growth_count(), 1);
        assert_eq!(
            pool.reserved_bytes(),
            2 * BLOCK_HEADER_SIZE + footprint * 2 + 1024
        );

        unsafe {
            pool.release(a.as_ptr());
            pool.release(b.as_ptr());
            pool.release(c.as_ptr());
        }

        assert_eq!(pool.block_count(), 1);
        check_integrity(&pool);
    }

    #[test]
    fn emptied_head_is_reset_and_reused() {
        let mut pool = pool(nz!(64), nz!(64));

        let a = pool.allocate(16).unwrap();
        unsafe { pool.release(a.as_ptr()) };

        // The head block was reset, so the same memory is carved again.
        let b = pool.allocate(16).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.growth_count(), 0);

        unsafe { pool.release(b.as_ptr()) };
    }

    #[test]
    fn emptied_growth_block_becomes_spare_and_is_reused() {
        let mut pool = pool(nz!(64), nz!(64));

        let a = pool.allocate(64 - CHUNK_HEADER_SIZE).unwrap();
        let b = pool.allocate(16).unwrap();
        assert_eq!(pool.block_count(), 2);
        assert_eq!(pool.growth_count(), 1);

        unsafe { pool.release(b.as_ptr()) };
        assert_eq!(pool.block_count(), 1);
        assert!(pool.has_spare_block());

        // The spare is brought back without another trip to the system allocator.
        let c = pool.allocate(16).unwrap();
        assert_eq!(pool.block_count(), 2);
        assert_eq!(pool.growth_count(), 1);
        assert!(!pool.has_spare_block());
        assert_eq!(b, c);

        unsafe {
            pool.release(c.as_ptr());
            pool.release(a.as_ptr());
        }
        check_integrity(&pool);
    }

    #[test]
    fn spare_retention_can_be_disabled() {
        let mut pool = ChunkPool::builder()
            .prealloc_bytes(nz!(64))
            .growth_bytes(nz!(64))
            .retain_spare_block(false)
            .build()
            .unwrap();

        let a = pool.allocate(64 - CHUNK_HEADER_SIZE).unwrap();
        let initial_reserved = pool.reserved_bytes();

        let b = pool.allocate(16).unwrap();
        unsafe { pool.release(b.as_ptr()) };

        assert!(!pool.has_spare_block());
        assert_eq!(pool.reserved_bytes(), initial_reserved);

        let c = pool.allocate(16).unwrap();
        assert_eq!(pool.growth_count(), 2);

        unsafe {
            pool.release(c.as_ptr());
            pool.release(a.as_ptr());
        }
    }

    #[test]
    fn shrink_to_fit_frees_spare() {
        let mut pool = pool(nz!(64), nz!(64));

        let a = pool.allocate(64 - CHUNK_HEADER_SIZE).unwrap();
        let baseline = pool.reserved_bytes();

        let b = pool.allocate(16).unwrap();
        unsafe { pool.release(b.as_ptr()) };
        assert!(pool.reserved_bytes() > baseline);

        pool.shrink_to_fit();

        assert!(!pool.has_spare_block());
        assert_eq!(pool.reserved_bytes(), baseline);

        unsafe { pool.release(a.as_ptr()) };
    }

    #[test]
    fn oversized_request_gets_dedicated_block() {
        let mut pool = pool(nz!(256), nz!(256));

        let small = pool.allocate(16).unwrap();
        let big = pool.allocate(10_000).unwrap();

        assert_eq!(pool.block_count(), 2);
        unsafe { big.as_ptr().write_bytes(0xAB, 10_000) };

        // Oversized blocks are not cached as spares.
        unsafe { pool.release(big.as_ptr()) };
        assert_eq!(pool.block_count(), 1);
        assert!(!pool.has_spare_block());

        unsafe { pool.release(small.as_ptr()) };
        check_integrity(&pool);
    }

    #[test]
    fn oversized_request_does_not_use_small_spare() {
        let mut pool = pool(nz!(64), nz!(64));

        let a = pool.allocate(64 - CHUNK_HEADER_SIZE).unwrap();
        let b = pool.allocate(16).unwrap();
        unsafe { pool.release(b.as_ptr()) };
        assert!(pool.has_spare_block());

        let big = pool.allocate(1000).unwrap();

        // The spare stays cached because it is too small for the request.
        assert!(pool.has_spare_block());
        assert_eq!(pool.growth_count(), 2);

        unsafe {
            pool.release(big.as_ptr());
            pool.release(a.as_ptr());
        }
        check_integrity(&pool);
    }

    #[test]
    fn releasing_middle_block_unlinks_it() {
        let per_block = 64 - CHUNK_HEADER_SIZE;
        let mut pool = pool(nz!(64), nz!(64));

        let first = pool.allocate(per_block).unwrap();
        let middle = pool.allocate(per_block).unwrap();
        let last = pool.allocate(per_block).unwrap();
        assert_eq!(pool.block_count(), 3);

        unsafe { pool.release(middle.as_ptr()) };
        assert_eq!(pool.block_count(), 2);
        check_integrity(&pool);

        // The tail is still the last block, so the next chunk comes from a new block.
        let next = pool.allocate(per_block).unwrap();
        assert_eq!(pool.block_count(), 3);

        unsafe {
            pool.release(last.as_ptr());
            pool.release(first.as_ptr());
            pool.release(next.as_ptr());
        }

        assert_eq!(pool.block_count(), 1);
        check_integrity(&pool);
    }

    #[test]
    fn too_large_request_is_size_overflow() {
        let mut pool = pool(nz!(256), nz!(256));

        let result = pool.allocate(usize::MAX);
        assert!(matches!(
            result,
            Err(Error::SizeOverflow {
                requested: usize::MAX
            })
        ));

        let result = pool.allocate(isize::MAX.unsigned_abs());
        assert!(matches!(result, Err(Error::SizeOverflow { .. })));

        // The failures left no trace.
        assert!(pool.is_empty());
        assert_eq!(pool.block_count(), 1);
        assert_eq!(pool.growth_count(), 0);
        check_integrity(&pool);

        let ptr = pool.allocate(16).unwrap();
        unsafe { pool.release(ptr.as_ptr()) };
    }

    #[test]
    fn exhausted_system_allocator_is_out_of_memory_and_keeps_spare() {
        let mut pool = pool(nz!(64), nz!(64));

        let a = pool.allocate(64 - CHUNK_HEADER_SIZE).unwrap();
        let b = pool.allocate(16).unwrap();
        unsafe { pool.release(b.as_ptr()) };
        assert!(pool.has_spare_block());

        let before = pool.stats();

        // Representable as a layout, but no system allocator can satisfy it.
        let result = pool.allocate(1 << 62);
        assert!(matches!(result, Err(Error::OutOfMemory { .. })));

        assert_eq!(pool.stats(), before);
        assert!(pool.has_spare_block());
        check_integrity(&pool);

        // The spare is still usable after the failure.
        let c = pool.allocate(16).unwrap();
        assert_eq!(b, c);
        assert_eq!(pool.growth_count(), before.growth_count);

        unsafe {
            pool.release(c.as_ptr());
            pool.release(a.as_ptr());
        }
    }

    #[test]
    fn over_aligned_layout_is_rejected() {
        let mut pool = pool(nz!(256), nz!(256));
        let layout = Layout::from_size_align(32, 2 * MAX_ALIGN).unwrap();

        let result = pool.allocate_layout(layout);

        assert!(matches!(
            result,
            Err(Error::UnsupportedAlignment {
                align,
                max_align: MAX_ALIGN
            }) if align == 2 * MAX_ALIGN
        ));
        assert!(pool.is_empty());
    }

    #[test]
    fn allocate_layout_accepts_max_align() {
        let mut pool = pool(nz!(256), nz!(256));
        let layout = Layout::from_size_align(48, MAX_ALIGN).unwrap();

        let ptr = pool.allocate_layout(layout).unwrap();
        assert_eq!(pool.live_bytes(), 48);

        unsafe { pool.release(ptr.as_ptr()) };
    }

    #[test]
    fn stats_match_accessors() {
        let mut pool = pool(nz!(64), nz!(64));
        let a = pool.allocate(40).unwrap();
        let b = pool.allocate(40).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.live_chunks, pool.len());
        assert_eq!(stats.live_bytes, pool.live_bytes());
        assert_eq!(stats.block_count, pool.block_count());
        assert_eq!(stats.reserved_bytes, pool.reserved_bytes());
        assert_eq!(stats.growth_count, pool.growth_count());

        unsafe {
            pool.release(a.as_ptr());
            pool.release(b.as_ptr());
        }
    }

    #[test]
    fn pool_ids_are_unique() {
        let a = pool(nz!(16), nz!(16));
        let b = pool(nz!(16), nz!(16));

        assert_ne!(a.pool_id, b.pool_id);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn double_release_panics_in_debug() {
        let mut pool = ChunkPool::builder()
            .drop_policy(DropPolicy::MayLeakChunks)
            .build()
            .unwrap();

        // Keep a second chunk live so the block is not reclaimed after the first release.
        let _keep = pool.allocate(8).unwrap();
        let ptr = pool.allocate(8).unwrap();

        unsafe {
            pool.release(ptr.as_ptr());
            pool.release(ptr.as_ptr());
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn release_to_wrong_pool_panics_in_debug() {
        let mut pool1 = ChunkPool::builder()
            .drop_policy(DropPolicy::MayLeakChunks)
            .build()
            .unwrap();
        let mut pool2 = ChunkPool::builder()
            .drop_policy(DropPolicy::MayLeakChunks)
            .build()
            .unwrap();

        let ptr = pool1.allocate(8).unwrap();

        // We also allocate from pool2 to ensure it has live chunks to "release".
        _ = pool2.allocate(8).unwrap();

        unsafe { pool2.release(ptr.as_ptr()) };
    }

    #[test]
    fn drop_with_no_live_chunks_does_not_panic_if_policy_must_not_leak() {
        let mut pool = ChunkPool::builder()
            .drop_policy(DropPolicy::MustNotLeakChunks)
            .build()
            .unwrap();

        let ptr = pool.allocate(8).unwrap();
        unsafe { pool.release(ptr.as_ptr()) };

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_chunks_panics_if_policy_must_not_leak() {
        let mut pool = ChunkPool::builder()
            .drop_policy(DropPolicy::MustNotLeakChunks)
            .build()
            .unwrap();

        _ = pool.allocate(8).unwrap();

        drop(pool);
    }

    #[test]
    fn drop_with_live_chunks_leaks_block_if_policy_may_leak() {
        let mut pool = ChunkPool::builder()
            .prealloc_bytes(nz!(64))
            .growth_bytes(nz!(64))
            .drop_policy(DropPolicy::MayLeakChunks)
            .build()
            .unwrap();

        let ptr = pool.allocate(8).unwrap();
        assert_eq!(pool.len(), 1);

        drop(pool);

        // The block was leaked rather than freed, so the chunk is still valid memory.
        unsafe {
            ptr.cast::<u64>().write(42);
            assert_eq!(ptr.cast::<u64>().read(), 42);
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn drop_with_live_chunks_panics_by_default_in_debug() {
        let mut pool = ChunkPool::builder().build().unwrap();

        _ = pool.allocate(8).unwrap();

        drop(pool);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn drop_with_live_chunks_leaks_by_default_in_release() {
        let mut pool = ChunkPool::builder().build().unwrap();

        let ptr = pool.allocate(8).unwrap();

        drop(pool);

        // No panic, and the leaked block keeps the chunk valid.
        unsafe {
            ptr.cast::<u64>().write(42);
            assert_eq!(ptr.cast::<u64>().read(), 42);
        }
    }

    #[test]
    fn pool_can_move_between_threads() {
        let mut pool = pool(nz!(256), nz!(256));
        let ptr = pool.allocate(8).unwrap();
        unsafe { ptr.cast::<u64>().write(7) };
        unsafe { pool.release(ptr.as_ptr()) };

        let pool = thread::spawn(move || {
            let mut pool = pool;
            let other = pool.allocate(8).unwrap();
            unsafe { other.cast::<u64>().write(8) };
            assert_eq!(pool.len(), 1);
            unsafe { pool.release(other.as_ptr()) };
            pool
        })
        .join()
        .unwrap();

        assert!(pool.is_empty());
        assert_eq!(pool.block_count(), 1);
    }
}
