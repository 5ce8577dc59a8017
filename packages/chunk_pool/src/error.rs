use thiserror::Error;

/// Errors that can occur when the pool obtains memory for a chunk.
///
/// Misuse of the pool (releasing a pointer twice or releasing a pointer that came from a
/// different pool) is not represented here. That is a contract violation that debug builds
/// detect with a panic and release builds do not check at all.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested size, once the chunk header and block header are accounted for,
    /// cannot be described by a valid memory layout.
    #[error("allocation of {requested} bytes exceeds the largest size a block can represent")]
    SizeOverflow {
        /// The number of bytes the caller asked for.
        requested: usize,
    },

    /// The system allocator failed to provide memory for a new block.
    #[error("the system allocator could not provide a block of {block_bytes} bytes")]
    OutOfMemory {
        /// The total size of the block that could not be allocated, headers included.
        block_bytes: usize,
    },

    /// The caller asked for an alignment stricter than chunks are guaranteed to have.
    #[error("alignment of {align} bytes exceeds the {max_align}-byte alignment of pool chunks")]
    UnsupportedAlignment {
        /// The alignment that was requested.
        align: usize,

        /// The alignment every chunk is guaranteed to satisfy.
        max_align: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
