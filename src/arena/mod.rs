//! Memory Arena: a bump allocator over a byte range with marker-based
//! rewind (spec §4.4). The arena itself does no OS calls — it is handed a
//! `MemoryStart`/`MemorySize` window, typically carved from a
//! [`crate::pool::HostMemoryAllocation`] or a buddy-allocator block.

use crate::core::{MemoryBlock, MemoryKind};
use crate::error::{set_last_error, MemoryError, Result};
use crate::utils::align_up;

const MAX_USER_DATA: usize = 64;

/// Configuration accepted by [`MemoryArena::init`].
#[derive(Debug, Clone)]
pub struct ArenaInit {
    pub name: String,
    pub kind: MemoryKind,
    /// Base address for `Host`, opaque offset for `Device`.
    pub memory_start: usize,
    pub memory_size: u64,
    pub user_data: Vec<u8>,
}

/// An opaque snapshot of an arena's bump offset, used for scoped rewind.
pub type Marker = u64;

/// A bump allocator over `[memory_start, memory_start + memory_size)`.
pub struct MemoryArena {
    name: String,
    kind: MemoryKind,
    memory_start: usize,
    memory_size: u64,
    next_offset: u64,
    user_data: [u8; MAX_USER_DATA],
    user_data_len: usize,
}

impl MemoryArena {
    /// Initialize an arena over the given window (spec §4.4).
    pub fn init(init: ArenaInit) -> Result<Self> {
        if init.user_data.len() > MAX_USER_DATA {
            return Err(set_last_error(MemoryError::InvalidParameter(
                "user_data must be at most 64 bytes",
            )));
        }
        let mut user_data = [0u8; MAX_USER_DATA];
        user_data[..init.user_data.len()].copy_from_slice(&init.user_data);

        #[cfg(feature = "logging")]
        tracing::debug!(
            name = %init.name,
            kind = ?init.kind,
            memory_start = init.memory_start,
            memory_size = init.memory_size,
            "initialized memory arena"
        );

        Ok(Self {
            name: init.name,
            kind: init.kind,
            memory_start: init.memory_start,
            memory_size: init.memory_size,
            next_offset: 0,
            user_data,
            user_data_len: init.user_data.len(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn user_data(&self) -> &[u8] {
        &self.user_data[..self.user_data_len]
    }

    /// Current bump offset, usable as a rewind point with [`reset_to_marker`](Self::reset_to_marker).
    pub fn marker(&self) -> Marker {
        self.next_offset
    }

    /// Rewind to a previously captured marker.
    ///
    /// # Panics
    /// Panics in debug builds if `marker > next_offset()`; behavior is
    /// otherwise undefined per spec §4.4, so callers must not pass a
    /// marker from a point ahead of the arena's current offset.
    pub fn reset_to_marker(&mut self, marker: Marker) {
        debug_assert!(marker <= self.next_offset, "marker ahead of current offset");
        self.next_offset = marker;
    }

    /// Reset the arena to empty.
    pub fn reset(&mut self) {
        self.next_offset = 0;
    }

    fn allocate_raw(&mut self, size: u64, align: u64) -> Result<(u64, u64)> {
        if align == 0 || !align.is_power_of_two() {
            return Err(set_last_error(MemoryError::invalid_alignment()));
        }
        let current = self.memory_start as u64 + self.next_offset;
        let aligned = align_up(current, align);
        let end = aligned
            .checked_add(size)
            .ok_or_else(|| set_last_error(MemoryError::invalid_size()))?;
        if end > self.memory_start as u64 + self.memory_size {
            #[cfg(feature = "logging")]
            tracing::warn!(name = %self.name, size, align, "arena out of memory");
            return Err(set_last_error(MemoryError::OutOfMemory));
        }
        self.next_offset = end - self.memory_start as u64;
        Ok((aligned, aligned - self.memory_start as u64))
    }

    /// Bump-allocate `size` bytes aligned to `align`, returning the host
    /// address. Requires `kind() == MemoryKind::Host`.
    pub fn allocate_host(&mut self, size: u64, align: u64) -> Result<(usize, MemoryBlock)> {
        if self.kind != MemoryKind::Host {
            return Err(set_last_error(MemoryError::InvalidParameter(
                "allocate_host called on a device arena",
            )));
        }
        let (aligned, offset) = self.allocate_raw(size, align)?;
        let block = MemoryBlock {
            host_address: aligned as usize,
            block_offset: offset,
            size_in_bytes: size,
            kind: MemoryKind::Host,
        };
        Ok((aligned as usize, block))
    }

    /// Bump-allocate `size` bytes aligned to `align`, returning the opaque
    /// device offset. Requires `kind() == MemoryKind::Device`.
    pub fn allocate_device(&mut self, size: u64, align: u64) -> Result<(u64, MemoryBlock)> {
        if self.kind != MemoryKind::Device {
            return Err(set_last_error(MemoryError::InvalidParameter(
                "allocate_device called on a host arena",
            )));
        }
        let (aligned, offset) = self.allocate_raw(size, align)?;
        let block = MemoryBlock {
            host_address: 0,
            block_offset: offset,
            size_in_bytes: size,
            kind: MemoryKind::Device,
        };
        Ok((aligned, block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_arena(size: u64) -> MemoryArena {
        // A fake but nonzero base so alignment math is exercised.
        MemoryArena::init(ArenaInit {
            name: "test-arena".into(),
            kind: MemoryKind::Host,
            memory_start: 0x1000,
            memory_size: size,
            user_data: Vec::new(),
        })
        .unwrap()
    }

    #[test]
    fn marker_rewind_reuses_region() {
        // Scenario 5 (spec §8).
        let mut arena = host_arena(1024 * 1024);
        let (off0, _) = arena.allocate_host(256 * 1024, 16).unwrap();
        assert_eq!(off0, 0x1000);

        let marker = arena.marker();
        let (off1, _) = arena.allocate_host(256 * 1024, 16).unwrap();
        assert_eq!(off1 - 0x1000, 262144);

        arena.reset_to_marker(marker);
        let (off2, _) = arena.allocate_host(512 * 1024, 16).unwrap();
        assert_eq!(off2 - 0x1000, 262144);
    }

    #[test]
    fn allocation_beyond_capacity_fails() {
        let mut arena = host_arena(4096);
        assert!(arena.allocate_host(8192, 8).is_err());
    }

    #[test]
    fn device_arena_rejects_host_allocation() {
        let mut arena = MemoryArena::init(ArenaInit {
            name: "dev".into(),
            kind: MemoryKind::Device,
            memory_start: 0,
            memory_size: 4096,
            user_data: Vec::new(),
        })
        .unwrap();
        assert!(arena.allocate_host(128, 8).is_err());
        assert!(arena.allocate_device(128, 8).is_ok());
    }

    #[test]
    fn reset_returns_to_empty() {
        let mut arena = host_arena(4096);
        arena.allocate_host(1024, 8).unwrap();
        arena.reset();
        assert_eq!(arena.next_offset(), 0);
    }

    #[test]
    fn user_data_over_64_bytes_is_rejected() {
        let err = MemoryArena::init(ArenaInit {
            name: "bad".into(),
            kind: MemoryKind::Host,
            memory_start: 0,
            memory_size: 4096,
            user_data: vec![0u8; 65],
        })
        .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidParameter(_)));
    }
}
