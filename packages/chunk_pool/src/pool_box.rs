use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use crate::LocalChunkPool;

/// Unique owner of a value stored in a chunk of a [`LocalChunkPool`].
///
/// This is the pool-backed counterpart of [`Box<T>`]. Dropping it drops the value and
/// releases the chunk back to the pool.
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
/// let mut value = pool.insert(10_u32)?;
/// *value += 5;
/// assert_eq!(*value, 15);
///
/// // Moving the value out releases the chunk.
/// let inner = value.into_inner();
/// assert_eq!(inner, 15);
/// assert!(pool.is_empty());
/// # Ok::<(), chunk_pool::Error>(())
/// ```
pub struct PoolBox<T> {
    ptr: NonNull<T>,

    /// Keeps the pool alive as long as the value exists.
    pool: LocalChunkPool,

    // We own a T and drop it.
    _owns: PhantomData<T>,
}

impl<T> PoolBox<T> {
    /// # Safety
    ///
    /// `ptr` must point to an initialized `T` at the start of a live chunk allocated from
    /// `pool`, and nothing else may own or release that chunk.
    pub(crate) unsafe fn new(ptr: NonNull<T>, pool: LocalChunkPool) -> Self {
        Self {
            ptr,
            pool,
            _owns: PhantomData,
        }
    }

    /// Returns a pointer to the stored value.
    ///
    /// The pointer is valid until the box is dropped or consumed. The caller must ensure that
    /// Rust's aliasing rules are respected when using it.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Moves the value out of the pool and releases its chunk.
    #[must_use]
    pub fn into_inner(self) -> T {
        let this = ManuallyDrop::new(self);

        // SAFETY: The box owns an initialized T. ManuallyDrop ensures it is not dropped again.
        let value = unsafe { this.ptr.read() };

        // SAFETY: We own `this` and ManuallyDrop ensures it will not be auto-dropped.
        let pool = unsafe { ptr::read(&raw const this.pool) };

        // SAFETY: The chunk came from this pool and the value has been moved out of it.
        unsafe {
            pool.release(this.ptr.as_ptr().cast());
        }

        value
    }
}

impl<T> Deref for PoolBox<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: The box owns an initialized T for as long as it exists.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PoolBox<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: The box owns an initialized T and we hold the only handle exclusively.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PoolBox<T> {
    fn drop(&mut self) {
        // The value is dropped before the pool is borrowed, so its own drop logic is free to
        // release other values from the same pool.
        // SAFETY: The box owns an initialized T that is never accessed again.
        unsafe {
            ptr::drop_in_place(self.ptr.as_ptr());
        }

        // SAFETY: The chunk came from this pool and is released exactly once, here.
        unsafe {
            self.pool.release(self.ptr.as_ptr().cast());
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PoolBox").field(&**self).finish()
    }
}

impl<T: fmt::Display> fmt::Display for PoolBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&**self, f)
    }
}
