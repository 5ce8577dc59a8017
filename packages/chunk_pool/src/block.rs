use std::alloc::{Layout, alloc, dealloc};
use std::mem;
use std::ptr::NonNull;

use crate::{Error, MAX_ALIGN, Result, round_up_to_max_align};

/// Bookkeeping stored at the start of every block, ahead of the carving region.
///
/// Blocks are linked into a doubly linked chain so that an emptied block in the middle of
/// the chain can be detached in constant time.
#[derive(Debug)]
#[repr(C)]
struct BlockHeader {
    prev: Option<Block>,
    next: Option<Block>,

    /// Offset from the start of the block to the first byte that has never been carved.
    /// Carving only ever moves this forward; it moves back only when the block is reset.
    cursor: usize,

    /// Total size of the block allocation, header included.
    size: usize,

    /// Number of chunks carved from this block that have not yet been released.
    live_chunks: usize,
}

const _: () = assert!(mem::align_of::<BlockHeader>() <= MAX_ALIGN);

/// Bytes at the start of each block that are taken by the block header.
pub(crate) const BLOCK_HEADER_SIZE: usize = round_up_to_max_align(mem::size_of::<BlockHeader>());

/// A handle to one contiguous memory region obtained from the system allocator.
///
/// This is a plain pointer: copying it does not copy the block. The pool that allocated the
/// block is its exclusive owner and is responsible for calling [`free()`](Self::free) exactly
/// once. Every method requires that the block has not been freed yet.
///
/// # Out of band access
///
/// The block does not create or keep references to the chunks carved from it. Callers may
/// access chunk memory through pointers while the pool is being mutated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub(crate) struct Block(NonNull<BlockHeader>);

impl Block {
    /// Allocates a block with room for at least `capacity` bytes of chunks.
    pub(crate) fn allocate(capacity: usize) -> Result<Self> {
        let size = BLOCK_HEADER_SIZE
            .checked_add(capacity)
            .and_then(|size| size.checked_next_multiple_of(MAX_ALIGN))
            .ok_or(Error::SizeOverflow {
                requested: capacity,
            })?;

        let layout = Layout::from_size_align(size, MAX_ALIGN).map_err(|_layout_error| {
            Error::SizeOverflow {
                requested: capacity,
            }
        })?;

        // SAFETY: The layout is valid and has a non-zero size because the header is non-empty.
        let base = NonNull::new(unsafe { alloc(layout) })
            .ok_or(Error::OutOfMemory { block_bytes: size })?;

        let header_ptr = base.cast::<BlockHeader>();

        // SAFETY: We just allocated `size` bytes aligned to MAX_ALIGN, which is enough for the
        // header at the start of the allocation.
        unsafe {
            header_ptr.write(BlockHeader {
                prev: None,
                next: None,
                cursor: BLOCK_HEADER_SIZE,
                size,
                live_chunks: 0,
            });
        }

        Ok(Self(header_ptr))
    }

    /// Returns the block's memory to the system allocator.
    ///
    /// # Safety
    ///
    /// The block must not have been freed already and must not be used after this call,
    /// including through pointers to chunks carved from it.
    pub(crate) unsafe fn free(self) {
        let size = self.size();

        // SAFETY: This is the same layout that allocate() validated and allocated with.
        let layout = unsafe { Layout::from_size_align_unchecked(size, MAX_ALIGN) };

        // SAFETY: The caller guarantees the block is still allocated and not used again.
        unsafe {
            dealloc(self.0.as_ptr().cast(), layout);
        }
    }

    fn header(&self) -> &BlockHeader {
        // SAFETY: The header was initialized in allocate() and the block has not been freed.
        // The pool owning the block holds no other references into the header.
        unsafe { self.0.as_ref() }
    }

    #[allow(
        clippy::needless_pass_by_ref_mut,
        reason = "requiring &mut keeps header mutation tied to exclusive access of the handle"
    )]
    fn header_mut(&mut self) -> &mut BlockHeader {
        // SAFETY: The header was initialized in allocate() and the block has not been freed.
        // The pool owning the block is single-threaded and holds no other references into
        // the header while this one is alive.
        unsafe { self.0.as_mut() }
    }

    /// Total bytes obtained from the system allocator for this block, header included.
    #[must_use]
    pub(crate) fn size(self) -> usize {
        self.header().size
    }

    /// Bytes available for chunks when the block is empty.
    #[must_use]
    pub(crate) fn capacity(self) -> usize {
        // Cannot underflow because every block is allocated with room for its header.
        self.size().wrapping_sub(BLOCK_HEADER_SIZE)
    }

    /// Bytes that have never been carved and remain available at the tail of the block.
    #[must_use]
    pub(crate) fn available(self) -> usize {
        let header = self.header();

        // Cannot underflow because carving never moves the cursor past the end.
        header.size.wrapping_sub(header.cursor)
    }

    /// Bytes of the block that have been carved since it was allocated or last reset.
    #[must_use]
    pub(crate) fn carved(self) -> usize {
        // Cannot underflow because the cursor starts after the header.
        self.header().cursor.wrapping_sub(BLOCK_HEADER_SIZE)
    }

    #[must_use]
    pub(crate) fn live_chunks(self) -> usize {
        self.header().live_chunks
    }

    #[must_use]
    pub(crate) fn is_empty(self) -> bool {
        self.live_chunks() == 0
    }

    #[must_use]
    pub(crate) fn prev(self) -> Option<Self> {
        self.header().prev
    }

    #[must_use]
    pub(crate) fn next(self) -> Option<Self> {
        self.header().next
    }

    pub(crate) fn set_prev(mut self, prev: Option<Self>) {
        self.header_mut().prev = prev;
    }

    pub(crate) fn set_next(mut self, next: Option<Self>) {
        self.header_mut().next = next;
    }

    /// Carves `footprint` bytes from the unused tail of the block, returning the start of the
    /// carved region, or `None` if the tail is too small.
    ///
    /// `footprint` must be a multiple of `MAX_ALIGN`, so every carved region starts
    /// `MAX_ALIGN`-aligned.
    pub(crate) fn try_carve(mut self, footprint: usize) -> Option<NonNull<u8>> {
        debug_assert_eq!(footprint % MAX_ALIGN, 0);

        if self.available() < footprint {
            return None;
        }

        let base = self.0.cast::<u8>();
        let header = self.header_mut();
        let offset = header.cursor;

        // Cannot overflow because we checked above that the footprint fits before `size`.
        header.cursor = offset.wrapping_add(footprint);

        // Cannot overflow because a block cannot hold more chunks than it has bytes.
        header.live_chunks = header.live_chunks.wrapping_add(1);

        // SAFETY: `offset` is within the allocation because offset + footprint <= size.
        Some(unsafe { base.byte_add(offset) })
    }

    /// Records that one chunk carved from this block has been released.
    ///
    /// Returns `true` if that was the last live chunk and the block is now empty.
    ///
    /// # Panics
    ///
    /// Panics if the block has no live chunks.
    pub(crate) fn release_chunk(mut self) -> bool {
        let header = self.header_mut();

        header.live_chunks = header
            .live_chunks
            .checked_sub(1)
            .expect("released a chunk from a block that has no live chunks");

        header.live_chunks == 0
    }

    /// Makes the whole capacity of an empty block available for carving again.
    ///
    /// # Panics
    ///
    /// Panics if the block still has live chunks.
    pub(crate) fn reset(mut self) {
        let header = self.header_mut();

        assert!(
            header.live_chunks == 0,
            "cannot reset a block that still has {} live chunks",
            header.live_chunks
        );

        header.cursor = BLOCK_HEADER_SIZE;
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn header_size_is_aligned() {
        assert_eq!(BLOCK_HEADER_SIZE % MAX_ALIGN, 0);
        assert!(BLOCK_HEADER_SIZE >= mem::size_of::<BlockHeader>());
    }

    #[test]
    fn new_block_is_empty_with_requested_capacity() {
        let block = Block::allocate(1024).unwrap();

        assert!(block.is_empty());
        assert_eq!(block.capacity(), 1024);
        assert_eq!(block.available(), 1024);
        assert_eq!(block.carved(), 0);
        assert_eq!(block.size(), BLOCK_HEADER_SIZE + 1024);
        assert_eq!(block.prev(), None);
        assert_eq!(block.next(), None);

        // SAFETY: The block is not used after this.
        unsafe { block.free() };
    }

    #[test]
    fn capacity_is_rounded_up_to_alignment() {
        let block = Block::allocate(1).unwrap();

        assert_eq!(block.capacity(), MAX_ALIGN);

        // SAFETY: The block is not used after this.
        unsafe { block.free() };
    }

    #[test]
    fn carving_moves_cursor_and_counts_chunks() {
        let block = Block::allocate(64).unwrap();

        let first = block.try_carve(32).unwrap();
        let second = block.try_carve(32).unwrap();

        assert_eq!(block.live_chunks(), 2);
        assert_eq!(block.available(), 0);
        assert_eq!(block.carved(), 64);

        // SAFETY: Both pointers are in the same allocation.
        let distance = unsafe { second.byte_offset_from(first) };
        assert_eq!(distance, 32);

        assert_eq!(first.as_ptr().addr() % MAX_ALIGN, 0);
        assert_eq!(second.as_ptr().addr() % MAX_ALIGN, 0);

        assert!(!block.release_chunk());
        assert!(block.release_chunk());

        // SAFETY: The block is not used after this.
        unsafe { block.free() };
    }

    #[test]
    fn carve_beyond_capacity_is_none() {
        let block = Block::allocate(48).unwrap();

        assert!(block.try_carve(32).is_some());
        assert!(block.try_carve(32).is_none());

        // The failed attempt must not have changed the bookkeeping.
        assert_eq!(block.live_chunks(), 1);
        assert_eq!(block.available(), 16);

        _ = block.release_chunk();

        // SAFETY: The block is not used after this.
        unsafe { block.free() };
    }

    #[test]
    fn reset_restores_full_capacity() {
        let block = Block::allocate(64).unwrap();

        _ = block.try_carve(64).unwrap();
        assert_eq!(block.available(), 0);

        assert!(block.release_chunk());
        block.reset();

        assert_eq!(block.available(), 64);
        assert!(block.try_carve(64).is_some());
        _ = block.release_chunk();

        // SAFETY: The block is not used after this.
        unsafe { block.free() };
    }

    #[test]
    #[should_panic]
    fn reset_with_live_chunks_panics() {
        let block = Block::allocate(64).unwrap();
        _ = block.try_carve(32).unwrap();

        // The block is leaked by the panic, which is acceptable in a test.
        block.reset();
    }

    #[test]
    #[should_panic]
    fn release_from_empty_block_panics() {
        let block = Block::allocate(64).unwrap();

        _ = block.release_chunk();
    }

    #[test]
    fn links_are_stored() {
        let a = Block::allocate(16).unwrap();
        let b = Block::allocate(16).unwrap();

        a.set_next(Some(b));
        b.set_prev(Some(a));

        assert_eq!(a.next(), Some(b));
        assert_eq!(b.prev(), Some(a));
        assert_eq!(a.prev(), None);
        assert_eq!(b.next(), None);

        // SAFETY: Neither block is used after this.
        unsafe {
            a.free();
        }
        // SAFETY: Neither block is used after this.
        unsafe {
            b.free();
        }
    }

    #[test]
    fn unrepresentable_capacity_is_size_overflow() {
        let result = Block::allocate(usize::MAX - 8);

        assert!(matches!(result, Err(Error::SizeOverflow { .. })));
    }

    #[test]
    fn capacity_beyond_isize_is_size_overflow() {
        let result = Block::allocate(isize::MAX.unsigned_abs());

        assert!(matches!(result, Err(Error::SizeOverflow { .. })));
    }
}
