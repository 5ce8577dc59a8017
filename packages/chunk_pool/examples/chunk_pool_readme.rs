//! Example that demonstrates the exact usage shown in the README.md file.
//!
//! This shows how to allocate raw chunks from a `ChunkPool` and how to store typed values in a
//! `LocalChunkPool`.

use chunk_pool::{ChunkPool, LocalChunkPool, PoolRc};
use new_zealand::nz;

fn main() -> Result<(), chunk_pool::Error> {
    println!("=== Chunk Pool README Example ===");

    // Reserve 10 KiB up front and grow in 10 KiB blocks.
    let mut pool = ChunkPool::new(nz!(10240), nz!(10240))?;

    let ptr = pool.allocate(40)?.cast::<[i32; 10]>();

    // SAFETY: The chunk is 40 bytes long and aligned for i32.
    unsafe {
        ptr.write([7; 10]);
    }

    // SAFETY: We just initialized the chunk.
    let sum: i32 = unsafe { ptr.as_ref() }.iter().sum();
    println!("Sum of pooled array: {sum}");

    // SAFETY: The pointer came from this pool and is released exactly once.
    unsafe {
        pool.release(ptr.as_ptr().cast());
    }

    // Typed values are released automatically when their owners are dropped.
    let typed = LocalChunkPool::new()?;
    let greeting = typed.insert("Hello, pool!".to_string())?;
    let shared = typed.insert_shared(vec![1, 2, 3])?;
    let shared_again = shared.clone();

    println!("Boxed value: {}", *greeting);
    println!(
        "Shared value: {:?} ({} handles)",
        *shared_again,
        PoolRc::strong_count(&shared)
    );

    drop(greeting);
    drop(shared);
    drop(shared_again);

    assert!(typed.is_empty());

    println!("README example completed successfully!");
    Ok(())
}
