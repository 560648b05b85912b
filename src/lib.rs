//! # core-memory
//!
//! Host virtual-memory pooling and a buddy allocator for sub-allocating the
//! address space it reserves.
//!
//! Five pieces, leaves first:
//!
//! - [`utils`] — byte-level fill/copy/move/zero and alignment helpers.
//! - [`platform`] — the OS virtual-memory backend (reserve/commit/release).
//! - [`pool`] — a fixed-capacity registry of [`pool::HostMemoryAllocation`]
//!   records drawn from `platform`, plus the standalone
//!   `reserve_and_commit`/`increase_commit`/`release` allocation API.
//! - [`arena`] — a bump allocator with marker-based rewind over a byte range.
//! - [`buddy`] — a power-of-two sub-allocator over a byte range, using
//!   split/merge bit-indices and per-level free lists.
//!
//! Every fallible operation returns a [`error::Result`]; the same failure is
//! also stamped into a thread-local slot retrievable via
//! [`error::last_error`], mirroring the 0/-1-plus-retrievable-error-code
//! contract callers crossing an FFI boundary expect.
//!
//! Each pool, arena, and buddy allocator instance is single-writer: callers
//! must serialize access themselves if sharing one across threads.

pub mod arena;
pub mod buddy;
pub mod core;
pub mod error;
pub mod platform;
pub mod pool;
pub mod utils;

pub use arena::{ArenaInit, Marker, MemoryArena};
pub use buddy::{BlockInfo, BuddyAllocator, BuddyInit};
pub use core::{MemoryBlock, MemoryFlags, MemoryKind};
pub use error::{MemoryError, Result};
pub use pool::{CommitPolicy, HostMemoryAllocation, HostMemoryPool, PoolHandle, PoolInit};
