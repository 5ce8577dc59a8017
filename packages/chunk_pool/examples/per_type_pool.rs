//! Demonstrates routing every instance of one type through a dedicated pool.
//!
//! Short-lived objects that are created and destroyed at a high rate are constructed through
//! a thread-local `LocalChunkPool`, so only block growth ever reaches the system allocator.

use chunk_pool::{ChunkPool, LocalChunkPool, PoolBox};
use new_zealand::nz;

/// Number of objects kept alive at the same time.
const BATCH_SIZE: usize = 2000;

/// A small object of ten 32-bit integers.
#[derive(Debug)]
struct Particle {
    stuff: [i32; 10],
}

thread_local! {
    static PARTICLES: LocalChunkPool = LocalChunkPool::from(
        ChunkPool::new(nz!(10240), nz!(10240))
            .expect("the first block of the particle pool must be allocatable"),
    );
}

impl Particle {
    /// Creates a particle in the particle pool.
    fn spawn(seed: i32) -> PoolBox<Self> {
        PARTICLES
            .with(|pool| pool.insert(Self { stuff: [seed; 10] }))
            .expect("particle pool is out of memory")
    }

    fn energy(&self) -> i64 {
        self.stuff.iter().map(|&value| i64::from(value)).sum()
    }
}

fn main() {
    println!("=== Per-type Pool Example ===");

    for frame in 0..5 {
        let particles: Vec<_> = (0..BATCH_SIZE)
            .map(|i| Particle::spawn(i32::try_from(i).expect("batch size fits in i32")))
            .collect();

        let energy: i64 = particles.iter().map(|p| p.energy()).sum();
        let stats = PARTICLES.with(LocalChunkPool::stats);

        println!(
            "Frame {frame}: {} particles, energy {energy}, {} blocks, {} growth events",
            stats.live_chunks, stats.block_count, stats.growth_count
        );
    }

    // The first block and one spare block stay reserved between frames.
    let stats = PARTICLES.with(LocalChunkPool::stats);
    println!(
        "Final: {} live particles, {} bytes reserved",
        stats.live_chunks, stats.reserved_bytes
    );
}
