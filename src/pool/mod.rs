//! Host Memory Pool: a fixed-capacity registry of [`HostMemoryAllocation`]
//! records drawn from the VM backend, with a configurable aggregate commit
//! cap (spec §4.2).

mod allocation;

pub use allocation::{
    flush, increase_commit, release, reserve_and_commit, CommitBudget, CommitPolicy,
    HostMemoryAllocation,
};

use crate::core::MemoryFlags;
use crate::error::{set_last_error, MemoryError, Result};
use crate::platform;
use crate::utils::align_up;

/// Configuration accepted by [`HostMemoryPool::create`].
#[derive(Debug, Clone)]
pub struct PoolInit {
    pub name: String,
    pub capacity: usize,
    /// 0 defaults to the OS page size.
    pub min_alloc_size: u64,
    /// 0 defaults to the OS page size.
    pub min_commit_increase: u64,
    /// 0 means uncapped.
    pub max_total_commit: u64,
}

/// Opaque handle into a pool's record array, returned by
/// [`HostMemoryPool::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHandle(usize);

/// A preallocated, fixed-capacity registry of Host Memory Allocations.
pub struct HostMemoryPool {
    name: String,
    records: Vec<HostMemoryAllocation>,
    free_head: Option<usize>,
    policy: CommitPolicy,
    max_total_commit: u64,
    total_commitment: u64,
}

impl HostMemoryPool {
    /// Create a pool with `init.capacity` bookkeeping records (spec §4.2).
    ///
    /// The requested capacity, multiplied by the record size, is rounded up
    /// to a page multiple; the pool then uses whatever capacity fits in
    /// that rounded size (always `>= init.capacity`).
    pub fn create(init: PoolInit) -> Result<Self> {
        let page_info = platform::query_page_info();
        let record_size = core::mem::size_of::<HostMemoryAllocation>().max(1);

        let requested_bytes = init
            .capacity
            .checked_mul(record_size)
            .ok_or_else(|| set_last_error(MemoryError::invalid_size()))?;
        let rounded_bytes =
            align_up(requested_bytes.max(1) as u64, page_info.page_size as u64) as usize;
        let capacity = (rounded_bytes / record_size).max(init.capacity).max(1);

        let mut records = vec![HostMemoryAllocation::default(); capacity];
        for i in 0..capacity {
            records[i].free_list_next = if i + 1 < capacity { Some(i + 1) } else { None };
        }

        let min_alloc_size =
            if init.min_alloc_size == 0 { page_info.page_size as u64 } else { init.min_alloc_size };
        let min_commit_increase = if init.min_commit_increase == 0 {
            page_info.page_size as u64
        } else {
            init.min_commit_increase
        };

        #[cfg(feature = "logging")]
        tracing::debug!(
            name = %init.name,
            capacity,
            min_alloc_size,
            min_commit_increase,
            max_total_commit = init.max_total_commit,
            "created host memory pool"
        );

        Ok(Self {
            name: init.name,
            records,
            free_head: Some(0),
            policy: CommitPolicy { min_reserve: min_alloc_size, min_commit_increase },
            max_total_commit: init.max_total_commit,
            total_commitment: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn total_commitment(&self) -> u64 {
        self.total_commitment
    }

    pub fn max_total_commit(&self) -> u64 {
        self.max_total_commit
    }

    pub fn record(&self, handle: PoolHandle) -> &HostMemoryAllocation {
        &self.records[handle.0]
    }

    fn budget(&mut self) -> CommitBudget<'_> {
        CommitBudget { max_total: self.max_total_commit, current_total: &mut self.total_commitment }
    }

    /// Pop a free record, reserve/commit it, and return a handle to it.
    /// Returns `None` (not `Err`) if the free list is empty or the OS
    /// reservation fails, without popping the free-list head on failure.
    pub fn allocate(&mut self, reserve: u64, commit: u64, flags: MemoryFlags) -> Option<PoolHandle> {
        let index = self.free_head?;
        let policy = self.policy;
        let budget = self.budget();
        match allocation::reserve_and_commit(
            &mut self.records[index],
            reserve,
            commit,
            flags,
            &policy,
            Some(budget),
        ) {
            Ok(()) => {
                self.free_head = self.records[index].free_list_next;
                self.records[index].free_list_next = None;
                #[cfg(feature = "logging")]
                tracing::trace!(
                    pool = %self.name,
                    index,
                    reserve,
                    commit,
                    total_commitment = self.total_commitment,
                    "pool allocation acquired"
                );
                Some(PoolHandle(index))
            }
            Err(_err) => {
                #[cfg(feature = "logging")]
                tracing::warn!(pool = %self.name, reserve, commit, err = ?_err, "pool allocation failed");
                None
            }
        }
    }

    /// Grow a held allocation's committed range (spec §4.3).
    pub fn increase_commit(&mut self, handle: PoolHandle, commit: u64) -> Result<()> {
        let policy = self.policy;
        let budget = self.budget();
        allocation::increase_commit(&mut self.records[handle.0], commit, &policy, Some(budget))
    }

    /// Flush the instruction cache for an executable allocation.
    pub fn flush(&self, handle: PoolHandle) {
        allocation::flush(&self.records[handle.0]);
    }

    /// Release a held allocation's OS range and return its record to the
    /// free list.
    pub fn release(&mut self, handle: Option<PoolHandle>) {
        let Some(handle) = handle else { return };
        let budget = CommitBudget { max_total: self.max_total_commit, current_total: &mut self.total_commitment };
        let _ = allocation::release(&mut self.records[handle.0], Some(budget));
        self.records[handle.0].free_list_next = self.free_head;
        self.free_head = Some(handle.0);
        #[cfg(feature = "logging")]
        tracing::trace!(
            pool = %self.name,
            index = handle.0,
            total_commitment = self.total_commitment,
            "pool allocation released"
        );
    }

    /// Release every record's OS range and rebuild the free list,
    /// preserving configuration.
    pub fn reset(&mut self) {
        #[cfg(feature = "logging")]
        tracing::debug!(pool = %self.name, "resetting host memory pool");
        let capacity = self.records.len();
        for i in 0..capacity {
            let budget =
                CommitBudget { max_total: self.max_total_commit, current_total: &mut self.total_commitment };
            let _ = allocation::release(&mut self.records[i], Some(budget));
            self.records[i].free_list_next = if i + 1 < capacity { Some(i + 1) } else { None };
        }
        self.free_head = if capacity > 0 { Some(0) } else { None };
    }
}

impl Drop for HostMemoryPool {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool(max_total_commit: u64) -> HostMemoryPool {
        HostMemoryPool::create(PoolInit {
            name: "test-pool".into(),
            capacity: 4,
            min_alloc_size: 0,
            min_commit_increase: 0,
            max_total_commit,
        })
        .unwrap()
    }

    #[test]
    fn allocate_and_release_return_record_to_free_list() {
        let mut pool = small_pool(0);
        let before = pool.capacity();
        let h = pool.allocate(4096, 4096, MemoryFlags::READ | MemoryFlags::WRITE).unwrap();
        assert!(pool.record(h).base_address().is_some());
        pool.release(Some(h));
        // Allocating `before` times should succeed again since the record
        // was returned to the free list.
        let mut handles = Vec::new();
        for _ in 0..before {
            handles.push(pool.allocate(4096, 4096, MemoryFlags::READ | MemoryFlags::WRITE).unwrap());
        }
        assert!(pool.allocate(4096, 4096, MemoryFlags::READ | MemoryFlags::WRITE).is_none());
        for h in handles {
            pool.release(Some(h));
        }
    }

    #[test]
    fn pool_cap_enforcement_leaves_state_unchanged_on_failure() {
        // Scenario 4 (spec §8): 16 MiB cap, 2 MiB + 14 MiB succeed, then a
        // further 1 MiB allocation fails and leaves the pool unchanged.
        let mut pool = small_pool(16 * 1024 * 1024);
        let h1 = pool.allocate(2 * 1024 * 1024, 2 * 1024 * 1024, MemoryFlags::READ | MemoryFlags::WRITE);
        assert!(h1.is_some());
        let h2 = pool.allocate(14 * 1024 * 1024, 14 * 1024 * 1024, MemoryFlags::READ | MemoryFlags::WRITE);
        assert!(h2.is_some());
        assert_eq!(pool.total_commitment(), 16 * 1024 * 1024);

        let before = pool.total_commitment();
        let h3 = pool.allocate(1024 * 1024, 1024 * 1024, MemoryFlags::READ | MemoryFlags::WRITE);
        assert!(h3.is_none());
        assert_eq!(pool.total_commitment(), before);

        pool.release(h1);
        pool.release(h2);
    }

    #[test]
    fn release_of_none_is_noop() {
        let mut pool = small_pool(0);
        pool.release(None);
    }
}
