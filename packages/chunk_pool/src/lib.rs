#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A single-threaded pool allocator for many small, short-lived allocations.
//!
//! [`ChunkPool`] reserves memory from the system allocator in large blocks and hands out
//! variable-size chunks by bump-carving them from the most recent block. Releasing a chunk is
//! a constant-time counter update on the block it came from; once every chunk of a block has
//! been released, the block is reset, cached or returned to the system allocator.
//!
//! This makes the pool a good fit for workloads that create and destroy many small objects
//! in roughly stack-like or queue-like order, such as per-frame or per-request scratch data,
//! where the system allocator would otherwise be hit for every object.
//!
//! # Key Features
//!
//! - **Constant-time allocation and release**: no free lists, no searching
//! - **Any release order**: stack, queue and random orders are all supported
//! - **Uniform alignment**: every chunk is aligned to [`MAX_ALIGN`]
//! - **Bounded churn**: the first block is never freed and one emptied growth block is kept
//!   as a spare, so oscillating around a block boundary does not hit the system allocator
//! - **Debug-build misuse detection**: double release and release to the wrong pool panic
//! - **Typed handles**: [`LocalChunkPool`] stores values behind [`PoolBox<T>`] and
//!   [`PoolRc<T>`] smart pointers that release their chunks automatically
//!
//! # Examples
//!
//! ## Raw allocation
//!
//! ```rust
//! use chunk_pool::ChunkPool;
//! use new_zealand::nz;
//!
//! let mut pool = ChunkPool::new(nz!(10240), nz!(10240))?;
//!
//! let chunks: Vec<_> = (0..100)
//!     .map(|_| pool.allocate(40))
//!     .collect::<Result<_, _>>()?;
//!
//! assert_eq!(pool.len(), 100);
//!
//! for chunk in chunks {
//!     // SAFETY: Every pointer came from this pool and is released exactly once.
//!     unsafe { pool.release(chunk.as_ptr()) };
//! }
//!
//! assert!(pool.is_empty());
//! # Ok::<(), chunk_pool::Error>(())
//! ```
//!
//! ## Typed values
//!
//! ```rust
//! use chunk_pool::LocalChunkPool;
//!
//! let pool = LocalChunkPool::new()?;
//!
//! let name = pool.insert("pooled".to_string())?;
//! let shared = pool.insert_shared([1_u32, 2, 3])?;
//! let shared_again = shared.clone();
//!
//! assert_eq!(*name, "pooled");
//! assert_eq!(shared_again[2], 3);
//! assert_eq!(pool.len(), 2);
//! # Ok::<(), chunk_pool::Error>(())
//! ```

mod block;
mod builder;
mod chunk;
mod drop_policy;
mod error;
mod local_pool;
mod pool;
mod pool_box;
mod pool_rc;
mod stats;

pub(crate) use block::*;
pub use builder::*;
pub use chunk::MAX_ALIGN;
pub(crate) use chunk::{ChunkHeader, chunk_footprint, round_up_to_max_align};
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub use local_pool::*;
pub use pool::*;
pub use pool_box::*;
pub(crate) use pool_rc::RcBox;
pub use pool_rc::PoolRc;
pub use stats::*;
