use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use crate::LocalChunkPool;

/// The contents of the chunk behind a [`PoolRc<T>`]: the handle count followed by the value.
pub(crate) struct RcBox<T> {
    strong: Cell<usize>,
    value: T,
}

impl<T> RcBox<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            strong: Cell::new(1),
            value,
        }
    }
}

/// Reference-counted shared owner of a value stored in a chunk of a [`LocalChunkPool`].
///
/// This is the pool-backed counterpart of [`std::rc::Rc<T>`]. The count lives in the same
/// chunk as the value, so cloning a handle never touches the pool. When the last handle is
/// dropped, the value is dropped and the chunk is released back to the pool.
///
/// # Single-threaded Design
///
/// This type is designed for single-threaded use and is neither [`Send`] nor [`Sync`].
///
/// # Example
///
/// ```rust
/// use chunk_pool::{LocalChunkPool, PoolRc};
///
/// let pool = LocalChunkPool::new()?;
///
/// let a = pool.insert_shared(5_u32)?;
/// let b = a.clone();
///
/// assert!(PoolRc::ptr_eq(&a, &b));
/// assert_eq!(PoolRc::strong_count(&a), 2);
///
/// drop(a);
/// assert_eq!(PoolRc::try_unwrap(b).ok(), Some(5));
/// assert!(pool.is_empty());
/// # Ok::<(), chunk_pool::Error>(())
/// ```
pub struct PoolRc<T> {
    inner: NonNull<RcBox<T>>,

    /// Keeps the pool alive as long as any handle exists.
    pool: LocalChunkPool,

    // The handles collectively own an RcBox<T> and drop it.
    _owns: PhantomData<RcBox<T>>,
}

impl<T> PoolRc<T> {
    /// # Safety
    ///
    /// `inner` must point to an initialized `RcBox<T>` with a strong count of one at the start
    /// of a live chunk allocated from `pool`, and nothing else may own or release that chunk.
    pub(crate) unsafe fn from_inner(inner: NonNull<RcBox<T>>, pool: LocalChunkPool) -> Self {
        Self {
            inner,
            pool,
            _owns: PhantomData,
        }
    }

    fn rc_box(&self) -> &RcBox<T> {
        // SAFETY: The RcBox stays initialized for as long as any handle exists, and it is
        // only mutated through the Cell or through get_mut() on a unique handle.
        unsafe { self.inner.as_ref() }
    }

    /// The number of handles sharing the value.
    #[must_use]
    pub fn strong_count(this: &Self) -> usize {
        this.rc_box().strong.get()
    }

    /// Whether both handles share the same value.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.inner == other.inner
    }

    /// Returns a mutable reference to the value if this is the only handle.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::{LocalChunkPool, PoolRc};
    ///
    /// let pool = LocalChunkPool::new()?;
    /// let mut a = pool.insert_shared(1_u8)?;
    ///
    /// *PoolRc::get_mut(&mut a).unwrap() = 2;
    /// assert_eq!(*a, 2);
    ///
    /// let b = a.clone();
    /// assert!(PoolRc::get_mut(&mut a).is_none());
    /// # drop(b);
    /// # Ok::<(), chunk_pool::Error>(())
    /// ```
    #[must_use]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        if Self::strong_count(this) != 1 {
            return None;
        }

        // SAFETY: This is the only handle and we hold it exclusively, so no other reference
        // to the value can exist.
        Some(unsafe { &mut this.inner.as_mut().value })
    }

    /// Moves the value out and releases the chunk if this is the only handle. Otherwise
    /// returns the handle unchanged.
    ///
    /// # Errors
    ///
    /// Returns the handle itself if other handles share the value.
    pub fn try_unwrap(this: Self) -> Result<T, Self> {
        if Self::strong_count(&this) != 1 {
            return Err(this);
        }

        let this = ManuallyDrop::new(this);

        // SAFETY: This is the only handle, so the value is exclusively ours to move out.
        // ManuallyDrop ensures it is not dropped again.
        let value = unsafe { ptr::read(&this.rc_box().value) };

        // SAFETY: We own `this` and ManuallyDrop ensures it will not be auto-dropped.
        let pool = unsafe { ptr::read(&raw const this.pool) };

        // SAFETY: The chunk came from this pool and its contents have been moved out.
        unsafe {
            pool.release(this.inner.as_ptr().cast());
        }

        Ok(value)
    }
}

impl<T> Clone for PoolRc<T> {
    fn clone(&self) -> Self {
        let strong = &self.rc_box().strong;

        strong.set(
            strong
                .get()
                .checked_add(1)
                .expect("reference count overflow is not possible with real memory"),
        );

        Self {
            inner: self.inner,
            pool: self.pool.clone(),
            _owns: PhantomData,
        }
    }
}

impl<T> Deref for PoolRc<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.rc_box().value
    }
}

impl<T> Drop for PoolRc<T> {
    fn drop(&mut self) {
        let strong = &self.rc_box().strong;

        // Cannot underflow because every live handle accounts for one.
        let remaining = strong.get().wrapping_sub(1);
        strong.set(remaining);

        if remaining != 0 {
            return;
        }

        // SAFETY: This was the last handle, so nothing will access the RcBox again.
        unsafe {
            ptr::drop_in_place(self.inner.as_ptr());
        }

        // SAFETY: The chunk came from this pool and is released exactly once, by the last
        // handle.
        unsafe {
            self.pool.release(self.inner.as_ptr().cast());
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolRc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PoolRc").field(&**self).finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(PoolRc<u32>: Clone);
    assert_not_impl_any!(PoolRc<u32>: Send, Sync);

    #[test]
    fn clones_share_value_and_chunk() {
        let pool = LocalChunkPool::new().unwrap();

        let a = pool.insert_shared(String::from("shared")).unwrap();
        let b = a.clone();
        let c = b.clone();

        assert_eq!(PoolRc::strong_count(&a), 3);
        assert!(PoolRc::ptr_eq(&a, &c));
        assert_eq!(pool.len(), 1);

        drop(a);
        drop(b);
        assert_eq!(PoolRc::strong_count(&c), 1);
        assert_eq!(pool.len(), 1);

        drop(c);
        assert!(pool.is_empty());
    }

    #[test]
    fn distinct_values_are_not_ptr_eq() {
        let pool = LocalChunkPool::new().unwrap();

        let a = pool.insert_shared(1_u8).unwrap();
        let b = pool.insert_shared(1_u8).unwrap();

        assert!(!PoolRc::ptr_eq(&a, &b));
    }

    #[test]
    fn try_unwrap_fails_while_shared() {
        let pool = LocalChunkPool::new().unwrap();

        let a = pool.insert_shared(vec![1_u8]).unwrap();
        let b = a.clone();

        let a = PoolRc::try_unwrap(a).unwrap_err();
        assert_eq!(PoolRc::strong_count(&a), 2);

        drop(b);

        let value = PoolRc::try_unwrap(a).unwrap();
        assert_eq!(value, vec![1_u8]);
        assert!(pool.is_empty());
    }

    #[test]
    fn get_mut_only_when_unique() {
        let pool = LocalChunkPool::new().unwrap();

        let mut a = pool.insert_shared(10_i32).unwrap();
        *PoolRc::get_mut(&mut a).unwrap() += 1;
        assert_eq!(*a, 11);

        let b = a.clone();
        assert!(PoolRc::get_mut(&mut a).is_none());

        drop(b);
        assert!(PoolRc::get_mut(&mut a).is_some());
    }

    #[test]
    fn debug_delegates_to_value() {
        let pool = LocalChunkPool::new().unwrap();
        let a = pool.insert_shared(3_u8).unwrap();

        assert_eq!(format!("{a:?}"), "PoolRc(3)");
    }
}
