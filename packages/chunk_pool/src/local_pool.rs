use std::alloc::Layout;
use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::{ChunkPool, PoolBox, PoolRc, PoolStats, Result, RcBox};

/// A single-threaded, cloneable handle to a shared [`ChunkPool`] that stores typed values.
///
/// Values inserted through this handle live in chunks of the shared pool and are owned by
/// smart pointers ([`PoolBox<T>`] or [`PoolRc<T>`]) that drop the value and release its
/// chunk automatically. Each smart pointer holds a clone of the handle, so the pool stays
/// alive for as long as any value stored in it does.
///
/// # Single-threaded Design
///
/// This type is designed for single-threaded use and is neither [`Send`] nor [`Sync`].
///
/// # Example
///
/// ```rust
/// use chunk_pool::LocalChunkPool;
///
/// let pool = LocalChunkPool::new()?;
///
/// let number = pool.insert(42_u64)?;
/// let text = pool.insert("hello".to_string())?;
///
/// assert_eq!(*number, 42);
/// assert_eq!(*text, "hello");
/// assert_eq!(pool.len(), 2);
///
/// drop(number);
/// drop(text);
/// assert!(pool.is_empty());
/// # Ok::<(), chunk_pool::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct LocalChunkPool {
    /// The shared pool instance protected by a `RefCell` for single-threaded interior mutability.
    inner: Rc<RefCell<ChunkPool>>,
}

impl From<ChunkPool> for LocalChunkPool {
    /// Wraps an existing pool, for example one created with a custom configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::{ChunkPool, LocalChunkPool};
    /// use new_zealand::nz;
    ///
    /// let pool = ChunkPool::builder().growth_bytes(nz!(65536)).build()?;
    ///
    /// let pool = LocalChunkPool::from(pool);
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    fn from(pool: ChunkPool) -> Self {
        Self {
            inner: Rc::new(RefCell::new(pool)),
        }
    }
}

impl LocalChunkPool {
    /// Creates a new [`LocalChunkPool`] wrapping a pool with default configuration.
    ///
    /// # Errors
    ///
    /// Fails if the pool's first block cannot be allocated.
    pub fn new() -> Result<Self> {
        Ok(Self::from(ChunkPool::builder().build()?))
    }

    /// Moves a value into a chunk of the pool and returns its unique owner.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedAlignment`][crate::Error::UnsupportedAlignment] if `T`
    /// requires a stricter alignment than [`MAX_ALIGN`][crate::MAX_ALIGN], or any error that
    /// [`ChunkPool::allocate()`] can return. The value is dropped on failure.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::LocalChunkPool;
    ///
    /// let pool = LocalChunkPool::new()?;
    ///
    /// let mut item = pool.insert(vec![1, 2, 3])?;
    /// item.push(4);
    ///
    /// assert_eq!(item.len(), 4);
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    pub fn insert<T>(&self, value: T) -> Result<PoolBox<T>> {
        let ptr = self.allocate(Layout::new::<T>())?.cast::<T>();

        // SAFETY: The chunk is freshly allocated, MAX_ALIGN-aligned (which satisfies the
        // alignment of T, as checked by allocate_layout) and large enough for T.
        unsafe {
            ptr.write(value);
        }

        // SAFETY: The chunk came from this pool and now holds an initialized T that nothing
        // else refers to.
        Ok(unsafe { PoolBox::new(ptr, self.clone()) })
    }

    /// Moves a value into a chunk of the pool and returns a reference-counted owner.
    ///
    /// # Errors
    ///
    /// Fails under the same conditions as [`insert()`](Self::insert).
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::{LocalChunkPool, PoolRc};
    ///
    /// let pool = LocalChunkPool::new()?;
    ///
    /// let first = pool.insert_shared("shared".to_string())?;
    /// let second = first.clone();
    ///
    /// assert_eq!(PoolRc::strong_count(&first), 2);
    /// assert_eq!(*second, "shared");
    ///
    /// // Cloning does not allocate another chunk.
    /// assert_eq!(pool.len(), 1);
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    pub fn insert_shared<T>(&self, value: T) -> Result<PoolRc<T>> {
        let ptr = self.allocate(Layout::new::<RcBox<T>>())?.cast::<RcBox<T>>();

        // SAFETY: The chunk is freshly allocated, suitably aligned and large enough.
        unsafe {
            ptr.write(RcBox::new(value));
        }

        // SAFETY: The chunk came from this pool and now holds an initialized RcBox with a
        // strong count of one, owned by the handle we are creating.
        Ok(unsafe { PoolRc::from_inner(ptr, self.clone()) })
    }

    /// The number of values currently stored in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        let pool = self.inner.borrow();
        pool.len()
    }

    /// Whether the pool stores no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let pool = self.inner.borrow();
        pool.is_empty()
    }

    /// A snapshot of the underlying pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let pool = self.inner.borrow();
        pool.stats()
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>> {
        let mut pool = self.inner.borrow_mut();
        pool.allocate_layout(layout)
    }

    /// Returns a chunk to the pool. Used by the smart pointers once they have dropped or moved
    /// out the value.
    ///
    /// # Safety
    ///
    /// The pointer must have come from this pool and must not be released again.
    pub(crate) unsafe fn release(&self, ptr: *mut u8) {
        let mut pool = self.inner.borrow_mut();

        // SAFETY: Forwarding the caller's guarantees.
        unsafe {
            pool.release(ptr);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use std::cell::Cell;

    use static_assertions::assert_not_impl_any;

    use super::*;
    use crate::{DropPolicy, Error};

    assert_not_impl_any!(LocalChunkPool: Send, Sync);

    #[test]
    fn insert_and_drop() {
        let pool = LocalChunkPool::new().unwrap();

        let item = pool.insert(42_u32).unwrap();
        assert_eq!(*item, 42);
        assert_eq!(pool.len(), 1);

        drop(item);
        assert!(pool.is_empty());
    }

    #[test]
    fn handles_share_one_pool() {
        let pool = LocalChunkPool::new().unwrap();
        let pool_clone = pool.clone();

        let _a = pool.insert(1_u8).unwrap();
        let _b = pool_clone.insert(2_u8).unwrap();

        assert_eq!(pool.len(), 2);
        assert_eq!(pool_clone.stats().live_chunks, 2);
    }

    #[test]
    fn values_keep_pool_alive() {
        let item = {
            let pool = LocalChunkPool::new().unwrap();
            pool.insert("outlives the handle".to_string()).unwrap()
        };

        assert_eq!(*item, "outlives the handle");
    }

    #[test]
    fn over_aligned_type_is_rejected() {
        #[repr(align(64))]
        struct OverAligned(#[allow(dead_code, reason = "only the layout matters")] u8);

        let pool = LocalChunkPool::new().unwrap();

        let result = pool.insert(OverAligned(1));

        assert!(matches!(result, Err(Error::UnsupportedAlignment { .. })));
        assert!(pool.is_empty());
    }

    #[test]
    fn nested_values_release_from_drop() {
        struct Node {
            _child: Option<PoolBox<Node>>,
        }

        let pool = LocalChunkPool::new().unwrap();

        let leaf = pool.insert(Node { _child: None }).unwrap();
        let root = pool.insert(Node { _child: Some(leaf) }).unwrap();
        assert_eq!(pool.len(), 2);

        // Dropping the root drops the leaf while the root's chunk is still allocated.
        drop(root);
        assert!(pool.is_empty());
    }

    #[test]
    fn values_are_dropped_exactly_once() {
        struct Counted<'a>(&'a Cell<usize>);

        impl Drop for Counted<'_> {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Cell::new(0);
        let pool = LocalChunkPool::new().unwrap();

        let unique = pool.insert(Counted(&drops)).unwrap();
        let shared = pool.insert_shared(Counted(&drops)).unwrap();
        let shared_clone = shared.clone();

        drop(unique);
        assert_eq!(drops.get(), 1);

        drop(shared);
        assert_eq!(drops.get(), 1);

        drop(shared_clone);
        assert_eq!(drops.get(), 2);
        assert!(pool.is_empty());
    }

    #[test]
    fn from_configured_pool() {
        let pool = ChunkPool::builder()
            .drop_policy(DropPolicy::MustNotLeakChunks)
            .build()
            .unwrap();
        let pool = LocalChunkPool::from(pool);

        let item = pool.insert(7_i64).unwrap();
        assert_eq!(*item, 7);
    }
}
