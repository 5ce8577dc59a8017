//! Measures the memory the pool actually requests from the system allocator, as opposed to
//! its own growth counters.

#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::arithmetic_side_effects,
    reason = "test code doesn't need the same rigor as production code"
)]

use alloc_tracker::{Allocator, Session};
use chunk_pool::ChunkPool;
use new_zealand::nz;

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

const CHURN_ITERATIONS: u64 = 10_000;

#[test]
#[cfg_attr(miri, ignore)] // Test uses the real platform which cannot be executed under Miri.
fn churn_across_block_boundary_allocates_one_block() {
    let session = Session::new();

    // The anchor leaves too little room in the first block, so every churn iteration needs a
    // second block.
    let mut pool = ChunkPool::new(nz!(64), nz!(64)).unwrap();
    let anchor = pool.allocate(32).unwrap();
    let reserved_before = pool.reserved_bytes();

    {
        let op = session.operation("boundary_churn");
        let _span = op.measure_thread().iterations(CHURN_ITERATIONS);

        for _ in 0..CHURN_ITERATIONS {
            let ptr = pool.allocate(32).unwrap();
            unsafe { pool.release(ptr.as_ptr()) };
        }
    }

    assert_eq!(pool.growth_count(), 1);
    assert!(pool.has_spare_block());

    // Exactly the one retained spare block was obtained from the system allocator.
    let spare_bytes = pool.reserved_bytes() - reserved_before;
    let report = session.to_report();
    let (name, op) = report.operations().next().unwrap();

    assert_eq!(name, "boundary_churn");
    assert_eq!(op.total_iterations(), CHURN_ITERATIONS);
    assert_eq!(op.total_bytes_allocated(), u64::try_from(spare_bytes).unwrap());

    unsafe { pool.release(anchor.as_ptr()) };
}

#[test]
#[cfg_attr(miri, ignore)] // Test uses the real platform which cannot be executed under Miri.
fn churn_within_first_block_allocates_nothing() {
    let session = Session::new();
    let mut pool = ChunkPool::new(nz!(10240), nz!(10240)).unwrap();

    {
        let op = session.operation("first_block_churn");
        let _span = op.measure_thread().iterations(CHURN_ITERATIONS);

        for _ in 0..CHURN_ITERATIONS {
            let ptr = pool.allocate(40).unwrap();
            unsafe { pool.release(ptr.as_ptr()) };
        }
    }

    let report = session.to_report();
    let (_, op) = report.operations().next().unwrap();

    assert_eq!(op.total_bytes_allocated(), 0);
    assert_eq!(pool.growth_count(), 0);
}
