//! Cache error types.

use thiserror::Error;

use crate::Handle;

/// Cache error type.
#[derive(Debug, Error)]
pub enum CacheError {
    /// IO error from the backing file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Handle does not point into a committed region.
    #[error("handle {handle} out of bounds (cache holds {len} bytes)")]
    OutOfBounds { handle: Handle, len: u64 },
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
