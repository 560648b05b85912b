//! Guard-page fault test (spec §8 scenario 6).
//!
//! A committed allocation with its guard page intact must trap on first
//! touch. The test process can't survive a SIGSEGV/access violation to
//! assert on it directly, so it re-execs itself as a child running only
//! the faulting probe and asserts the child died abnormally rather than
//! exiting cleanly.

use std::env;
use std::process::Command;

use core_memory::core::MemoryFlags;
use core_memory::pool::{reserve_and_commit, CommitPolicy, HostMemoryAllocation};

const PROBE_ENV: &str = "CORE_MEMORY_GUARD_PAGE_PROBE";

#[test]
fn touching_a_guard_page_traps() {
    if env::var_os(PROBE_ENV).is_some() {
        run_probe();
        return;
    }

    let exe = env::current_exe().expect("could not resolve current test binary");
    let status = Command::new(exe)
        .args(["--test-threads=1", "--exact", "touching_a_guard_page_traps"])
        .env(PROBE_ENV, "1")
        .status()
        .expect("failed to spawn guard-page probe child process");

    assert!(
        !status.success(),
        "child process read a guard page without trapping (status: {status})"
    );
}

/// Reserve and commit one page with its trailing guard page, then read
/// one byte into the guard page. This must fault the process.
fn run_probe() {
    let policy = CommitPolicy::standalone();
    let mut alloc = HostMemoryAllocation::default();
    reserve_and_commit(&mut alloc, 4096, 4096, MemoryFlags::READ | MemoryFlags::WRITE, &policy, None)
        .expect("reserve_and_commit failed in guard-page probe");

    let base = alloc.base_address().expect("no base address after reserve_and_commit");
    let guard_ptr = (base + alloc.bytes_reserved() as usize) as *const u8;

    unsafe {
        let _ = std::ptr::read_volatile(guard_ptr);
    }

    // A platform bug that leaves the guard page readable reaches here
    // instead of faulting; exit cleanly so the parent's status check
    // reports the failure as a normal assertion rather than hanging.
    eprintln!("guard page read did not fault");
}
