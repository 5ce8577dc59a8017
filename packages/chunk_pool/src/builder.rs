use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{ChunkPool, DropPolicy, Result};

/// Chunk capacity reserved at construction and added by each growth event unless configured
/// otherwise.
const DEFAULT_BLOCK_BYTES: NonZero<usize> = nz!(10_240);

/// Builder for creating an instance of [`ChunkPool`].
///
/// All settings are optional. By default, the pool reserves 10 KiB of chunk capacity up front
/// and grows in 10 KiB blocks.
///
/// # Examples
///
/// ```
/// use chunk_pool::{ChunkPool, DropPolicy};
/// use new_zealand::nz;
///
/// let pool = ChunkPool::builder()
///     .prealloc_bytes(nz!(32768))
///     .growth_bytes(nz!(4096))
///     .retain_spare_block(false)
///     .drop_policy(DropPolicy::MayLeakChunks)
///     .build()?;
///
/// assert_eq!(pool.prealloc_bytes().get(), 32 * 1024);
/// # Ok::<(), chunk_pool::Error>(())
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct ChunkPoolBuilder {
    prealloc_bytes: NonZero<usize>,
    growth_bytes: NonZero<usize>,
    retain_spare_block: bool,
    drop_policy: DropPolicy,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl ChunkPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            prealloc_bytes: DEFAULT_BLOCK_BYTES,
            growth_bytes: DEFAULT_BLOCK_BYTES,
            retain_spare_block: true,
            drop_policy: DropPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets how many bytes of chunk capacity the pool reserves when it is created.
    ///
    /// This block is never returned to the system allocator before the pool is dropped.
    /// Size it for the expected steady-state working set.
    #[inline]
    pub fn prealloc_bytes(mut self, bytes: NonZero<usize>) -> Self {
        self.prealloc_bytes = bytes;
        self
    }

    /// Sets how many bytes of chunk capacity each growth block provides.
    ///
    /// A single request larger than this gets a dedicated block sized to fit it.
    #[inline]
    pub fn growth_bytes(mut self, bytes: NonZero<usize>) -> Self {
        self.growth_bytes = bytes;
        self
    }

    /// Sets whether one emptied growth block is cached for reuse instead of being returned to
    /// the system allocator immediately. Enabled by default.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::ChunkPool;
    ///
    /// let pool = ChunkPool::builder().retain_spare_block(false).build()?;
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    #[inline]
    pub fn retain_spare_block(mut self, retain: bool) -> Self {
        self.retain_spare_block = retain;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat chunks that are still live when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::{ChunkPool, DropPolicy};
    ///
    /// let pool = ChunkPool::builder()
    ///     .drop_policy(DropPolicy::MustNotLeakChunks)
    ///     .build()?;
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Validates the options and creates the pool, allocating its first block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the first block cannot be
    /// allocated, or [`Error::SizeOverflow`][crate::Error::SizeOverflow] if the preallocation
    /// size cannot be described by a memory layout.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_pool::ChunkPool;
    ///
    /// let pool = ChunkPool::builder().build()?;
    ///
    /// assert_eq!(pool.prealloc_bytes().get(), 10 * 1024);
    /// assert_eq!(pool.growth_bytes().get(), 10 * 1024);
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    pub fn build(self) -> Result<ChunkPool> {
        ChunkPool::new_inner(
            self.prealloc_bytes,
            self.growth_bytes,
            self.retain_spare_block,
            self.drop_policy,
        )
    }
}
