//! Exercises the pool with the allocation and release orders it is designed for: stack,
//! random and queue, plus the single-object churn that the block retention policy exists for.
//!
//! Every chunk is filled with a pattern derived from its index and verified before release,
//! so any overlap between chunks or corruption by block bookkeeping is detected.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    clippy::integer_division,
    reason = "test code doesn't need the same rigor as production code"
)]

use std::ptr::NonNull;

use chunk_pool::{ChunkPool, MAX_ALIGN};
use new_zealand::nz;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Size of the test object, matching a struct of ten 32-bit integers.
const OBJECT_SIZE: usize = 40;

/// Working set size for the random and queue patterns.
const MAX_OBJECTS: usize = 4096;

/// Upper bound of the block space one test object occupies: the largest chunk header
/// (debug builds) plus the object rounded up to the chunk alignment.
const MAX_FOOTPRINT: usize = 2 * MAX_ALIGN + 48;

fn fill(ptr: NonNull<u8>, size: usize, tag: usize) {
    assert_eq!(ptr.as_ptr().addr() % MAX_ALIGN, 0);
    unsafe { ptr.as_ptr().write_bytes(tag as u8, size) };
}

fn verify(ptr: NonNull<u8>, size: usize, tag: usize) {
    for offset in 0..size {
        let byte = unsafe { ptr.as_ptr().add(offset).read() };
        assert_eq!(byte, tag as u8, "chunk {tag} corrupted at offset {offset}");
    }
}

fn default_pool() -> ChunkPool {
    ChunkPool::new(nz!(10240), nz!(10240)).unwrap()
}

#[test]
fn stack_order_returns_to_initial_state() {
    let mut pool = default_pool();
    let initial_blocks = pool.block_count();
    let initial_reserved = pool.reserved_bytes();

    for round in 0..3 {
        let mut chunks = Vec::with_capacity(MAX_OBJECTS);

        for i in 0..MAX_OBJECTS {
            let ptr = pool.allocate(OBJECT_SIZE).unwrap();
            fill(ptr, OBJECT_SIZE, i + round);
            chunks.push(ptr);
        }

        assert_eq!(pool.len(), MAX_OBJECTS);

        while let Some(ptr) = chunks.pop() {
            verify(ptr, OBJECT_SIZE, chunks.len() + round);
            unsafe { pool.release(ptr.as_ptr()) };
        }

        assert!(pool.is_empty());
        assert_eq!(pool.live_bytes(), 0);
        assert_eq!(pool.block_count(), initial_blocks);
    }

    // Only the spare block may remain beyond the initial reservation.
    pool.shrink_to_fit();
    assert_eq!(pool.reserved_bytes(), initial_reserved);
}

#[test]
fn random_order_stays_within_working_set() {
    let mut pool = default_pool();
    let mut rng = SmallRng::seed_from_u64(42);
    let mut slots: Vec<Option<NonNull<u8>>> = vec![None; MAX_OBJECTS];
    let mut expected_live = 0_usize;

    for _ in 0..100_000 {
        let index = rng.random_range(0..MAX_OBJECTS);

        match slots[index].take() {
            Some(ptr) => {
                verify(ptr, OBJECT_SIZE, index);
                unsafe { pool.release(ptr.as_ptr()) };
                expected_live -= 1;
            }
            None => {
                let ptr = pool.allocate(OBJECT_SIZE).unwrap();
                fill(ptr, OBJECT_SIZE, index);
                slots[index] = Some(ptr);
                expected_live += 1;
            }
        }

        assert_eq!(pool.len(), expected_live);
        assert!(pool.len() <= MAX_OBJECTS);
    }

    for (index, slot) in slots.iter_mut().enumerate() {
        if let Some(ptr) = slot.take() {
            verify(ptr, OBJECT_SIZE, index);
            unsafe { pool.release(ptr.as_ptr()) };
        }
    }

    assert!(pool.is_empty());
    assert_eq!(pool.live_bytes(), 0);
    assert_eq!(pool.block_count(), 1);
}

#[test]
fn queue_order_keeps_block_count_bounded() {
    let mut pool = default_pool();
    let mut rng = SmallRng::seed_from_u64(7);
    let mut max_blocks = 0;

    for _ in 0..200 {
        let count = rng.random_range(1..=MAX_OBJECTS);
        let mut chunks = Vec::with_capacity(count);

        for i in 0..count {
            let ptr = pool.allocate(OBJECT_SIZE).unwrap();
            fill(ptr, OBJECT_SIZE, i);
            chunks.push(ptr);
        }

        max_blocks = max_blocks.max(pool.block_count());

        for (i, ptr) in chunks.into_iter().enumerate() {
            verify(ptr, OBJECT_SIZE, i);
            unsafe { pool.release(ptr.as_ptr()) };
        }

        assert!(pool.is_empty());
        assert_eq!(pool.block_count(), 1);
    }

    // A burst never needs more blocks than the largest possible burst fills.
    let per_block_chunks = 10 * 1024 / MAX_FOOTPRINT;
    let bound = MAX_OBJECTS.div_ceil(per_block_chunks) + 1;
    assert!(
        max_blocks <= bound,
        "{max_blocks} blocks exceeds bound of {bound}"
    );
}

#[test]
fn single_object_churn_does_not_grow() {
    let mut pool = default_pool();

    for i in 0..10_000 {
        let ptr = pool.allocate(OBJECT_SIZE).unwrap();
        fill(ptr, OBJECT_SIZE, i);
        unsafe { pool.release(ptr.as_ptr()) };
    }

    assert!(pool.is_empty());
    assert_eq!(pool.growth_count(), 0);
    assert_eq!(pool.block_count(), 1);
}

#[test]
fn single_object_churn_at_block_boundary_grows_at_most_once() {
    // The first chunk leaves too little room in the first block for another one, so every
    // churn iteration crosses into a second block.
    let mut pool = ChunkPool::new(nz!(64), nz!(64)).unwrap();
    let anchor = pool.allocate(32).unwrap();
    fill(anchor, 32, 0xAA);

    for i in 0..10_000 {
        let ptr = pool.allocate(32).unwrap();
        assert_eq!(pool.block_count(), 2);
        fill(ptr, 32, i);
        unsafe { pool.release(ptr.as_ptr()) };
        assert_eq!(pool.block_count(), 1);
    }

    assert_eq!(pool.growth_count(), 1);
    assert!(pool.has_spare_block());

    verify(anchor, 32, 0xAA);
    unsafe { pool.release(anchor.as_ptr()) };
    assert!(pool.is_empty());
}

#[test]
fn oversized_request_does_not_corrupt_neighbours() {
    let mut pool = default_pool();

    let before = pool.allocate(OBJECT_SIZE).unwrap();
    fill(before, OBJECT_SIZE, 1);

    let big_size = 100 * 1024;
    let big = pool.allocate(big_size).unwrap();
    fill(big, big_size, 2);

    let after = pool.allocate(OBJECT_SIZE).unwrap();
    fill(after, OBJECT_SIZE, 3);

    verify(before, OBJECT_SIZE, 1);
    verify(big, big_size, 2);
    verify(after, OBJECT_SIZE, 3);

    assert_eq!(pool.live_bytes(), 2 * OBJECT_SIZE + big_size);

    unsafe {
        pool.release(big.as_ptr());
        pool.release(before.as_ptr());
        pool.release(after.as_ptr());
    }

    assert!(pool.is_empty());
    assert_eq!(pool.block_count(), 1);
}

#[test]
fn live_count_tracks_allocations_minus_releases() {
    let mut pool = default_pool();
    let mut rng = SmallRng::seed_from_u64(1234);
    let mut live = Vec::new();
    let mut allocations = 0_usize;
    let mut releases = 0_usize;

    for _ in 0..10_000 {
        if live.is_empty() || rng.random_bool(0.55) {
            let size = rng.random_range(0..=256);
            live.push((pool.allocate(size).unwrap(), size));
            allocations += 1;
        } else {
            let index = rng.random_range(0..live.len());
            let (ptr, _) = live.swap_remove(index);
            unsafe { pool.release(ptr.as_ptr()) };
            releases += 1;
        }

        assert_eq!(pool.len(), allocations - releases);
        assert_eq!(
            pool.live_bytes(),
            live.iter().map(|(_, size)| size).sum::<usize>()
        );
    }

    for (ptr, _) in live {
        unsafe { pool.release(ptr.as_ptr()) };
    }

    assert!(pool.is_empty());
}

#[test]
fn many_small_objects_force_growth_and_shrink_back() {
    let mut pool = ChunkPool::new(nz!(10240), nz!(10240)).unwrap();
    let mut chunks = Vec::with_capacity(2000);

    for i in 0..2000 {
        let ptr = pool.allocate(OBJECT_SIZE).unwrap();
        fill(ptr, OBJECT_SIZE, i);
        chunks.push(ptr);
    }

    assert_eq!(pool.len(), 2000);
    assert!(pool.growth_count() >= 7, "only {} growth events", pool.growth_count());
    assert!(pool.block_count() >= 8);

    while let Some(ptr) = chunks.pop() {
        verify(ptr, OBJECT_SIZE, chunks.len());
        unsafe { pool.release(ptr.as_ptr()) };
    }

    assert_eq!(pool.len(), 0);
    assert_eq!(pool.block_count(), 1);
}
