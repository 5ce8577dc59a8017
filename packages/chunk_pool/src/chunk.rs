use std::mem;
use std::ptr::NonNull;

use crate::Block;

/// Alignment of every chunk handed out by the pool, matching what the platform `malloc`
/// guarantees for general object storage on 64-bit targets.
pub const MAX_ALIGN: usize = 16;

const _: () = assert!(MAX_ALIGN.is_power_of_two());

/// Bookkeeping stored immediately before the region returned to the caller.
///
/// The header is how `release()` finds the owning block without any lookup structure.
#[derive(Debug)]
#[repr(C)]
pub(crate) struct ChunkHeader {
    /// The block this chunk was carved from. Fixed for the lifetime of the chunk.
    block: Block,

    /// The number of bytes the caller requested, used for live-byte accounting.
    size: usize,

    /// Identifies the pool that carved this chunk, so that releasing the chunk to the wrong
    /// pool can be detected.
    #[cfg(debug_assertions)]
    pool_id: u64,

    /// One of `LIVE_SENTINEL` or `RELEASED_SENTINEL`.
    #[cfg(debug_assertions)]
    sentinel: u64,
}

#[cfg(debug_assertions)]
const LIVE_SENTINEL: u64 = 0xC4A2_11FE_A110_CA7E;

#[cfg(debug_assertions)]
const RELEASED_SENTINEL: u64 = 0xC4A2_DEAD_F4EE_D000;

const _: () = assert!(mem::align_of::<ChunkHeader>() <= MAX_ALIGN);

/// Bytes between the start of a chunk and the region returned to the caller.
pub(crate) const CHUNK_HEADER_SIZE: usize = round_up_to_max_align(mem::size_of::<ChunkHeader>());

/// Rounds `value` up to the next multiple of [`MAX_ALIGN`].
///
/// Only for compile-time constants of known small magnitude.
#[allow(
    clippy::arithmetic_side_effects,
    reason = "only evaluated for header sizes far below usize::MAX"
)]
pub(crate) const fn round_up_to_max_align(value: usize) -> usize {
    (value + (MAX_ALIGN - 1)) & !(MAX_ALIGN - 1)
}

/// Calculates how many bytes of a block a chunk for `size` requested bytes occupies,
/// header included.
///
/// Zero-size requests are treated as one byte so that every chunk has a unique address.
/// Returns `None` if the footprint is not representable.
#[must_use]
pub(crate) fn chunk_footprint(size: usize) -> Option<usize> {
    let body = size.max(1).checked_add(MAX_ALIGN - 1)? & !(MAX_ALIGN - 1);
    body.checked_add(CHUNK_HEADER_SIZE)
}

impl ChunkHeader {
    #[cfg_attr(
        not(debug_assertions),
        expect(unused_variables, reason = "the pool id is only recorded in debug builds")
    )]
    #[must_use]
    pub(crate) fn new(block: Block, size: usize, pool_id: u64) -> Self {
        Self {
            block,
            size,
            #[cfg(debug_assertions)]
            pool_id,
            #[cfg(debug_assertions)]
            sentinel: LIVE_SENTINEL,
        }
    }

    #[must_use]
    pub(crate) fn block(&self) -> Block {
        self.block
    }

    #[must_use]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Writes the header at `chunk_start` and returns the pointer to hand out to the caller.
    ///
    /// # Safety
    ///
    /// `chunk_start` must be `MAX_ALIGN`-aligned and point to at least `CHUNK_HEADER_SIZE`
    /// writable bytes followed by the caller region, all within one block.
    #[must_use]
    pub(crate) unsafe fn write_at(self, chunk_start: NonNull<u8>) -> NonNull<u8> {
        let header_ptr = chunk_start.cast::<Self>();

        // SAFETY: The caller guarantees the memory is writable, aligned and large enough.
        unsafe {
            header_ptr.write(self);
        }

        // SAFETY: The caller guarantees the caller region follows the header in the same block.
        unsafe { chunk_start.byte_add(CHUNK_HEADER_SIZE) }
    }

    /// Recovers the header of a chunk from the pointer that was handed out to the caller.
    ///
    /// # Safety
    ///
    /// `user_ptr` must have been returned by `write_at()` and the chunk's block must not
    /// have been freed.
    #[must_use]
    pub(crate) unsafe fn of(user_ptr: NonNull<u8>) -> NonNull<Self> {
        // SAFETY: The header lives CHUNK_HEADER_SIZE bytes before the caller region
        // in the same allocation, as written by write_at().
        let chunk_start = unsafe { user_ptr.byte_sub(CHUNK_HEADER_SIZE) };

        // Chunk starts are MAX_ALIGN-aligned, which satisfies the header alignment.
        chunk_start.cast::<Self>()
    }

    /// Validates that the chunk is live and belongs to the pool identified by `pool_id`,
    /// then marks it released.
    ///
    /// # Panics
    ///
    /// Panics if the chunk was already released, if the header does not look like a chunk
    /// header at all, or if the chunk belongs to a different pool.
    #[cfg(debug_assertions)]
    pub(crate) fn mark_released(&mut self, pool_id: u64) {
        assert!(
            self.sentinel != RELEASED_SENTINEL,
            "chunk of {} bytes was released twice",
            self.size
        );
        assert!(
            self.sentinel == LIVE_SENTINEL,
            "released pointer was not allocated by a ChunkPool"
        );
        assert!(
            self.pool_id == pool_id,
            "chunk allocated by pool {} was released to pool {pool_id}",
            self.pool_id
        );

        self.sentinel = RELEASED_SENTINEL;
    }
}
