//! Error types for core-memory.
//!
//! The public surface is an idiomatic `Result<T, MemoryError>`. Internally
//! every fallible operation also stamps a thread-local "last error" slot,
//! mirroring the C-style `0`/`-1` + retrievable error-code contract the
//! original allocator's callers expect when crossing an FFI boundary.

use std::cell::Cell;

/// Error kinds produced by the pool, arena, and buddy allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// A pool's free list of bookkeeping records is empty.
    #[error("pool has no free allocation structures left")]
    OutOfStructures,

    /// The OS refused memory, or a pool/allocator capacity cap was hit.
    #[error("out of memory")]
    OutOfMemory,

    /// Misordered sizes, invalid alignment, non-power-of-two bounds, or an
    /// over-large size request.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// An operation was invoked on an object that was never initialized,
    /// e.g. `increase_commit` on a released allocation.
    #[error("invalid function call for current object state")]
    InvalidFunction,

    /// An underlying OS primitive failed; the raw OS error code is kept.
    #[error("OS call failed with code {0}")]
    OsFailure(i32),
}

impl MemoryError {
    /// Alignment was not a power of two, or exceeded the block it targets.
    pub fn invalid_alignment() -> Self {
        Self::InvalidParameter("alignment must be a power of two no greater than the block size")
    }

    pub fn invalid_size() -> Self {
        Self::InvalidParameter("size must be non-zero and within the allocator's bounds")
    }

    pub fn invalid_bounds() -> Self {
        Self::InvalidParameter("min/max sizes must be powers of two with min <= max")
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(err: std::io::Error) -> Self {
        Self::OsFailure(err.raw_os_error().unwrap_or(-1))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, MemoryError>;

thread_local! {
    static LAST_ERROR: Cell<Option<MemoryError>> = const { Cell::new(None) };
}

/// Record `err` as this thread's last error and return it, so call sites
/// can write `return Err(set_last_error(MemoryError::OutOfMemory))`.
pub(crate) fn set_last_error(err: MemoryError) -> MemoryError {
    LAST_ERROR.with(|slot| slot.set(Some(err)));
    err
}

/// Retrieve (without clearing) the last error recorded on this thread.
///
/// Mirrors the spec's "every function returns 0/-1; failure sets a
/// retrievable last-error code" contract for callers that prefer polling
/// a status code over matching on `Result`.
pub fn last_error() -> Option<MemoryError> {
    LAST_ERROR.with(|slot| slot.get())
}

/// Clear this thread's last-error slot.
pub fn clear_last_error() {
    LAST_ERROR.with(|slot| slot.set(None));
}
