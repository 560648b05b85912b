//! Host OS virtual-memory backend.
//!
//! The four primitives the rest of the crate depends on: reserve a
//! page-aligned address range, commit (back) part of it, release it, and
//! query the OS's page size / allocation granularity. Everything above this
//! module — the pool, the standalone allocation API, the arena, the buddy
//! allocator — is written against this interface only, never against
//! `libc`/`winapi` directly.

use std::io;
use std::sync::OnceLock;

use crate::error::{MemoryError, Result};

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

/// OS page size and allocation granularity, as required to round
/// reservations and validate `min_alloc_size` defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_size: usize,
    pub allocation_granularity: usize,
}

static PAGE_INFO: OnceLock<PageInfo> = OnceLock::new();

/// Query (and memoize) the OS page size and allocation granularity.
///
/// Per the design notes, this is process-global immutable information, so
/// it is queried once and cached for the lifetime of the process.
pub fn query_page_info() -> PageInfo {
    *PAGE_INFO.get_or_init(imp::query_page_info)
}

/// Memory protection requested for a committed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadOnly,
    ReadWrite,
    ReadWriteExecute,
}

impl Protection {
    pub fn from_flags(flags: crate::core::MemoryFlags) -> Self {
        use crate::core::MemoryFlags as F;
        if flags.contains(F::EXECUTE) {
            Self::ReadWriteExecute
        } else if flags.contains(F::WRITE) {
            Self::ReadWrite
        } else {
            Self::ReadOnly
        }
    }
}

/// Reserve `size` bytes of address space without backing it with memory.
/// `size` must already be page-aligned. Returns the base address.
pub fn reserve_range(size: usize) -> Result<usize> {
    imp::reserve(size).map_err(os_err)
}

/// Commit `size` bytes starting at `base` with the given protection.
/// `base` and `size` must fall within a prior `reserve_range` call and be
/// page-aligned.
pub fn commit_range(base: usize, size: usize, protection: Protection) -> Result<()> {
    imp::commit(base, size, protection).map_err(os_err)
}

/// Commit a single guard page at `base` so that first access traps.
pub fn commit_guard_page(base: usize, size: usize) -> Result<()> {
    imp::commit_guard(base, size).map_err(os_err)
}

/// Release the entire reservation starting at `base`.
pub fn release_range(base: usize, size: usize) -> Result<()> {
    imp::release(base, size).map_err(os_err)
}

/// Flush the CPU instruction cache over `[base, base+size)`. Needed only
/// when `EXECUTE` is in play; a no-op on architectures with a coherent
/// icache (e.g. x86_64).
pub fn flush_icache(base: usize, size: usize) {
    imp::flush_icache(base, size);
}

fn os_err(err: io::Error) -> MemoryError {
    crate::error::set_last_error(MemoryError::from(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_info_is_nonzero_and_power_of_two() {
        let info = query_page_info();
        assert!(info.page_size.is_power_of_two());
        assert!(info.allocation_granularity >= info.page_size);
    }

    #[test]
    fn reserve_commit_release_round_trips() {
        let info = query_page_info();
        let size = info.page_size * 4;
        let base = reserve_range(size).expect("reserve");
        commit_range(base, info.page_size, Protection::ReadWrite).expect("commit");
        unsafe {
            let p = base as *mut u8;
            p.write(42);
            assert_eq!(p.read(), 42);
        }
        release_range(base, size).expect("release");
    }
}
