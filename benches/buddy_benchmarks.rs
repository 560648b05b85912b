//! Smoke benchmarks for the buddy allocator's hot paths.
//!
//! Harness-free (`harness = false` in Cargo.toml): this crate's dependency
//! set for this slice doesn't carry `criterion`, so timing is done with
//! `std::time::Instant` directly and results are printed rather than
//! statistically compared. Run with `cargo bench`.

use std::time::Instant;

use core_memory::{BuddyAllocator, BuddyInit, MemoryBlock, MemoryKind};

fn report(label: &str, iterations: u32, elapsed: std::time::Duration) {
    let per_op = elapsed / iterations.max(1);
    println!("{label}: {iterations} iterations in {elapsed:?} ({per_op:?}/op)");
}

fn fresh_allocator() -> BuddyAllocator {
    BuddyAllocator::init(BuddyInit {
        name: "bench".into(),
        kind: MemoryKind::Host,
        memory_start: 0,
        memory_size: 16 * 1024 * 1024,
        allocation_size_min: 4 * 1024,
        allocation_size_max: 16 * 1024 * 1024,
        bytes_reserved: 0,
        user_data: Vec::new(),
        track_status: false,
    })
    .expect("allocator init")
}

/// Repeated leaf-level allocate/free pairs: the common case, exercising
/// the split cascade down to the minimum block size and straight-back
/// coalescing on free.
fn bench_leaf_allocate_free() {
    let mut allocator = fresh_allocator();
    const ITER: u32 = 20_000;

    let start = Instant::now();
    for _ in 0..ITER {
        let block = allocator.allocate(4 * 1024, 16).unwrap();
        allocator.free_block(&block).unwrap();
    }
    report("leaf allocate+free", ITER, start.elapsed());
}

/// Fill the allocator to capacity with minimum-size blocks, then drain it
/// in reverse order, exercising every level's free-list stack without
/// ever coalescing until the final pass.
fn bench_fill_and_drain() {
    let mut allocator = fresh_allocator();
    let leaf_count = (16 * 1024 * 1024 / (4 * 1024)) as u32;

    let start = Instant::now();
    let mut blocks: Vec<MemoryBlock> = Vec::with_capacity(leaf_count as usize);
    for _ in 0..leaf_count {
        blocks.push(allocator.allocate(4 * 1024, 16).unwrap());
    }
    for block in blocks.into_iter().rev() {
        allocator.free_block(&block).unwrap();
    }
    report("fill-and-drain full window", leaf_count, start.elapsed());
}

/// Mixed-size workload: allocate a spread of sizes, free half of them out
/// of order, then drain the rest — stresses the linear buddy-removal scan
/// in `free` at multiple levels concurrently.
fn bench_mixed_sizes() {
    let mut allocator = fresh_allocator();
    const ITER: u32 = 4_000;
    let sizes = [4 * 1024u64, 8 * 1024, 16 * 1024, 32 * 1024];

    let start = Instant::now();
    let mut blocks = Vec::new();
    for i in 0..ITER {
        let size = sizes[i as usize % sizes.len()];
        if let Ok(block) = allocator.allocate(size, 16) {
            blocks.push(block);
        }
        if blocks.len() > 64 {
            allocator.free_block(&blocks.remove(0)).unwrap();
        }
    }
    for block in blocks {
        allocator.free_block(&block).unwrap();
    }
    report("mixed-size workload", ITER, start.elapsed());
}

fn main() {
    bench_leaf_allocate_free();
    bench_fill_and_drain();
    bench_mixed_sizes();
}
