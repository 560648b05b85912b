//! Host Memory Allocation primitives (spec §4.3): the standalone
//! `reserve_and_commit` / `increase_commit` / `flush` / `release` API that
//! both the pool and free-standing callers build on.

use crate::core::MemoryFlags;
use crate::error::{set_last_error, MemoryError, Result};
use crate::platform::{self, Protection};
use crate::utils::align_up;

/// A single contiguous OS address-space allocation (spec §3).
///
/// `free_list_next` is the embedded link field a [`super::HostMemoryPool`]
/// threads its free list through; once the record is handed to a caller it
/// is free for the owner to ignore or repurpose.
#[derive(Debug, Clone, Copy)]
pub struct HostMemoryAllocation {
    base_address: Option<usize>,
    bytes_reserved: u64,
    bytes_committed: u64,
    flags: MemoryFlags,
    pub(super) free_list_next: Option<usize>,
}

impl Default for HostMemoryAllocation {
    fn default() -> Self {
        Self {
            base_address: None,
            bytes_reserved: 0,
            bytes_committed: 0,
            flags: MemoryFlags::empty(),
            free_list_next: None,
        }
    }
}

impl HostMemoryAllocation {
    pub fn base_address(&self) -> Option<usize> {
        self.base_address
    }

    pub fn bytes_reserved(&self) -> u64 {
        self.bytes_reserved
    }

    pub fn bytes_committed(&self) -> u64 {
        self.bytes_committed
    }

    pub fn flags(&self) -> MemoryFlags {
        self.flags
    }

    fn guard_bytes(&self) -> u64 {
        if self.flags.wants_guard() {
            platform::query_page_info().page_size as u64
        } else {
            0
        }
    }
}

/// Reservation/commit-increase policy: the pool's minimums, or page-size
/// defaults for standalone use (spec §4.3, step 1).
#[derive(Debug, Clone, Copy)]
pub struct CommitPolicy {
    pub min_reserve: u64,
    pub min_commit_increase: u64,
}

impl CommitPolicy {
    /// Policy for a standalone allocation not drawn from a pool: minimums
    /// fall back to the OS page size.
    pub fn standalone() -> Self {
        let page_size = platform::query_page_info().page_size as u64;
        Self { min_reserve: page_size, min_commit_increase: page_size }
    }
}

/// Tracks a pool's aggregate committed-byte cap while an operation is in
/// flight, so `reserve_and_commit`/`increase_commit`/`release` can enforce
/// and update it atomically with the OS call they wrap.
pub struct CommitBudget<'a> {
    pub max_total: u64,
    pub current_total: &'a mut u64,
}

impl CommitBudget<'_> {
    fn try_add(&mut self, amount: u64) -> Result<()> {
        if self.max_total != 0 {
            let projected = self.current_total.checked_add(amount).ok_or_else(|| {
                set_last_error(MemoryError::OutOfMemory)
            })?;
            if projected > self.max_total {
                return Err(set_last_error(MemoryError::OutOfMemory));
            }
        }
        *self.current_total += amount;
        Ok(())
    }

    fn sub(&mut self, amount: u64) {
        *self.current_total = self.current_total.saturating_sub(amount);
    }
}

/// Reserve `reserve` bytes (clamped up to `policy.min_reserve` and the OS
/// page size) and commit `commit` bytes of it under `flags` (spec §4.3).
pub fn reserve_and_commit(
    alloc: &mut HostMemoryAllocation,
    reserve: u64,
    commit: u64,
    flags: MemoryFlags,
    policy: &CommitPolicy,
    mut budget: Option<CommitBudget<'_>>,
) -> Result<()> {
    let flags = flags.normalized();
    let page_size = platform::query_page_info().page_size as u64;

    let min_reserve = if policy.min_reserve == 0 { page_size } else { policy.min_reserve };
    let reserve = reserve.max(min_reserve);

    if commit > reserve {
        return Err(set_last_error(MemoryError::invalid_size()));
    }

    let reserve = align_up(reserve, page_size);
    let protection = Protection::from_flags(flags);

    // EXECUTE forces the entire reservation to be committed up front.
    let mut commit = if flags.forces_full_commit() { reserve } else { commit };
    if commit > 0 {
        commit = align_up(commit, page_size);
    }

    let guard_bytes = if flags.wants_guard() { page_size } else { 0 };
    let total_bytes = reserve + guard_bytes;

    if let Some(budget) = budget.as_mut() {
        budget.try_add(commit)?;
    }

    let base = platform::reserve_range(total_bytes as usize).inspect_err(|_| {
        if let Some(budget) = budget.as_mut() {
            budget.sub(commit);
        }
    })?;

    let unwind = |budget: &mut Option<CommitBudget<'_>>| {
        let _ = platform::release_range(base, total_bytes as usize);
        if let Some(budget) = budget.as_mut() {
            budget.sub(commit);
        }
    };

    if commit > 0 {
        if let Err(e) = platform::commit_range(base, commit as usize, protection) {
            unwind(&mut budget);
            return Err(e);
        }
    }

    if guard_bytes > 0 {
        if let Err(e) = platform::commit_guard_page(base + reserve as usize, guard_bytes as usize) {
            unwind(&mut budget);
            return Err(e);
        }
    }

    alloc.base_address = Some(base);
    alloc.bytes_reserved = reserve;
    alloc.bytes_committed = commit;
    alloc.flags = flags;

    #[cfg(feature = "logging")]
    tracing::debug!(base, reserve, commit, guard_bytes, ?flags, "reserved and committed host memory");

    Ok(())
}

/// Grow an allocation's committed range to at least `commit` bytes
/// (spec §4.3).
pub fn increase_commit(
    alloc: &mut HostMemoryAllocation,
    commit: u64,
    policy: &CommitPolicy,
    mut budget: Option<CommitBudget<'_>>,
) -> Result<()> {
    let Some(base) = alloc.base_address else {
        return Err(set_last_error(MemoryError::InvalidFunction));
    };
    if alloc.bytes_committed >= commit {
        return Ok(());
    }

    let page_size = platform::query_page_info().page_size as u64;
    let min_increase = if policy.min_commit_increase == 0 { page_size } else { policy.min_commit_increase };
    let requested_increase = (commit - alloc.bytes_committed).max(min_increase);
    let new_total = alloc.bytes_committed + requested_increase;

    if new_total > alloc.bytes_reserved {
        return Err(set_last_error(MemoryError::OutOfMemory));
    }

    let new_committed = align_up(new_total, page_size).min(alloc.bytes_reserved);
    let additional = new_committed - alloc.bytes_committed;

    if let Some(budget) = budget.as_mut() {
        budget.try_add(additional)?;
    }

    let protection = Protection::from_flags(alloc.flags);
    let commit_start = base + alloc.bytes_committed as usize;
    if let Err(e) = platform::commit_range(commit_start, additional as usize, protection) {
        if let Some(budget) = budget.as_mut() {
            budget.sub(additional);
        }
        return Err(e);
    }

    alloc.bytes_committed = new_committed;

    #[cfg(feature = "logging")]
    tracing::trace!(base, new_committed, additional, "increased committed range");

    Ok(())
}

/// Flush the instruction cache over the committed range, if executable.
pub fn flush(alloc: &HostMemoryAllocation) {
    if alloc.flags.contains(MemoryFlags::EXECUTE) {
        if let Some(base) = alloc.base_address {
            platform::flush_icache(base, alloc.bytes_committed as usize);
        }
    }
}

/// Release the OS reservation backing `alloc`. No-op if it has no base
/// address (spec §4.3).
pub fn release(alloc: &mut HostMemoryAllocation, mut budget: Option<CommitBudget<'_>>) -> Result<()> {
    let Some(base) = alloc.base_address else {
        return Ok(());
    };
    let total_bytes = alloc.bytes_reserved + alloc.guard_bytes();
    platform::release_range(base, total_bytes as usize)?;
    if let Some(budget) = budget.as_mut() {
        budget.sub(alloc.bytes_committed);
    }

    #[cfg(feature = "logging")]
    tracing::debug!(base, total_bytes, "released host memory allocation");

    alloc.base_address = None;
    alloc.bytes_reserved = 0;
    alloc.bytes_committed = 0;
    Ok(())
}
