//! Shared types used across the pool, arena, and buddy allocator.

use core::fmt;

use bitflags::bitflags;

/// Distinguishes a real host address from an opaque device offset.
///
/// Arenas and the buddy allocator both carry this tag; the allocation
/// algorithms are identical in both cases, only the meaning of
/// `MemoryStart`/`HostAddress` changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// `MemoryStart` is a real, dereferenceable base address.
    Host,
    /// `MemoryStart` is an opaque offset into device-owned memory.
    Device,
}

bitflags! {
    /// Access flags for a host memory allocation.
    ///
    /// If `READ | WRITE | EXECUTE` is empty, `reserve_and_commit` defaults
    /// it to `READ | WRITE`. `EXECUTE` forces the entire reservation to be
    /// committed up front. `NO_GUARD` suppresses the trailing guard page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct MemoryFlags: u8 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const EXECUTE = 0b0100;
        const NO_GUARD = 0b1000;
    }
}

impl MemoryFlags {
    /// Flags normalized per the invariant in spec §3: an empty
    /// read/write/execute set defaults to read-write.
    pub fn normalized(self) -> Self {
        if (self & (Self::READ | Self::WRITE | Self::EXECUTE)).is_empty() {
            self | Self::READ | Self::WRITE
        } else {
            self
        }
    }

    /// Whether the entire reservation must be committed up front.
    pub fn forces_full_commit(self) -> bool {
        self.contains(Self::EXECUTE)
    }

    pub fn wants_guard(self) -> bool {
        !self.contains(Self::NO_GUARD)
    }
}

impl fmt::Display for MemoryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }

        let mut parts = Vec::new();
        if self.contains(Self::READ) {
            parts.push("READ");
        }
        if self.contains(Self::WRITE) {
            parts.push("WRITE");
        }
        if self.contains(Self::EXECUTE) {
            parts.push("EXECUTE");
        }
        if self.contains(Self::NO_GUARD) {
            parts.push("NO_GUARD");
        }
        write!(f, "{}", parts.join("|"))
    }
}

/// Describes one block handed back by an arena or the buddy allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Host address for `MemoryKind::Host`; otherwise 0 (use `block_offset`).
    pub host_address: usize,
    /// Offset relative to the owning arena/allocator's `MemoryStart`.
    pub block_offset: u64,
    /// Size of the block in bytes.
    pub size_in_bytes: u64,
    /// Whether this block lives in host or device address space.
    pub kind: MemoryKind,
}
