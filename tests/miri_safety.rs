//! Miri safety tests.
//!
//! Scoped to code with no OS-backed memory behind it: `utils`'s raw-pointer
//! primitives, and the arena/buddy allocators, which only ever touch
//! `Vec`-backed bookkeeping state (the `platform` backend's `mmap`/
//! `VirtualAlloc` calls aren't meaningful under Miri).
//!
//! Run with: cargo +nightly miri test --test miri_safety

#![cfg(miri)]

use core_memory::{ArenaInit, BuddyAllocator, BuddyInit, MemoryArena, MemoryKind};
use core_memory::utils::{align_up, copy, fill, mv, secure_zero, zero};

#[test]
fn miri_zero_and_fill_respect_bounds() {
    let mut buf = [7u8; 64];
    unsafe { zero(buf.as_mut_ptr(), buf.len()) };
    assert_eq!(buf, [0u8; 64]);
    unsafe { fill(buf.as_mut_ptr(), buf.len(), 0xAB) };
    assert!(buf.iter().all(|&b| b == 0xAB));
}

#[test]
fn miri_copy_nonoverlapping_is_sound() {
    let src = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let mut dst = [0u8; 8];
    unsafe { copy(dst.as_mut_ptr(), src.as_ptr(), src.len()) };
    assert_eq!(src, dst);
}

#[test]
fn miri_mv_handles_overlapping_forward_shift() {
    let mut buf = [1u8, 2, 3, 4, 5];
    unsafe { mv(buf.as_mut_ptr().add(1), buf.as_ptr(), 4) };
    assert_eq!(buf, [1, 1, 2, 3, 4]);
}

#[test]
fn miri_mv_handles_overlapping_backward_shift() {
    let mut buf = [1u8, 2, 3, 4, 5];
    unsafe { mv(buf.as_mut_ptr(), buf.as_ptr().add(1), 4) };
    assert_eq!(buf, [2, 3, 4, 5, 5]);
}

#[test]
fn miri_secure_zero_writes_every_byte() {
    let mut buf = [0xFFu8; 128];
    unsafe { secure_zero(buf.as_mut_ptr(), buf.len()) };
    assert_eq!(buf, [0u8; 128]);
}

#[test]
fn miri_zero_length_calls_touch_nothing() {
    let mut buf = [9u8; 4];
    unsafe {
        zero(buf.as_mut_ptr(), 0);
        fill(buf.as_mut_ptr(), 0, 1);
        copy(buf.as_mut_ptr(), buf.as_ptr(), 0);
        mv(buf.as_mut_ptr(), buf.as_ptr(), 0);
        secure_zero(buf.as_mut_ptr(), 0);
    }
    assert_eq!(buf, [9u8; 4]);
}

#[test]
fn miri_align_up_does_not_overflow_for_realistic_inputs() {
    assert_eq!(align_up(4095, 4096), 4096);
    assert_eq!(align_up(0, 4096), 0);
}

/// The arena is a pure bump allocator over a `Vec`-free byte-offset
/// counter; it never dereferences the addresses it hands out, so this
/// exercises its bookkeeping under Miri without touching real memory.
#[test]
fn miri_arena_marker_rewind_is_sound() {
    let mut arena = MemoryArena::init(ArenaInit {
        name: "miri-arena".into(),
        kind: MemoryKind::Host,
        memory_start: 0x1000,
        memory_size: 4096,
        user_data: Vec::new(),
    })
    .unwrap();

    let marker = arena.marker();
    for _ in 0..8 {
        arena.allocate_host(64, 8).unwrap();
    }
    arena.reset_to_marker(marker);
    assert_eq!(arena.next_offset(), marker);
}

/// The buddy allocator's state is entirely `Vec`/bitset bookkeeping; this
/// exercises the split/merge/free-list machinery under Miri without any
/// OS-backed memory behind the returned addresses.
#[test]
fn miri_buddy_allocate_and_free_cycle_is_sound() {
    let mut a = BuddyAllocator::init(BuddyInit {
        name: "miri-buddy".into(),
        kind: MemoryKind::Host,
        memory_start: 0x10_0000,
        memory_size: 64 * 1024,
        allocation_size_min: 4 * 1024,
        allocation_size_max: 64 * 1024,
        bytes_reserved: 0,
        user_data: Vec::new(),
        track_status: true,
    })
    .unwrap();

    let mut blocks = Vec::new();
    for _ in 0..16 {
        blocks.push(a.allocate(4 * 1024, 16).unwrap());
    }
    assert!(a.allocate(4 * 1024, 16).is_err());

    for block in blocks.into_iter().rev() {
        a.free_block(&block).unwrap();
    }
    assert_eq!(a.free_count(0), 1);
}
