//! Unix (Linux/macOS/*BSD) virtual-memory backend via raw `mmap`/`mprotect`.

use std::io;

use super::{PageInfo, Protection};

fn to_prot(protection: Protection) -> i32 {
    use libc::{PROT_EXEC, PROT_READ, PROT_WRITE};
    match protection {
        Protection::ReadOnly => PROT_READ,
        Protection::ReadWrite => PROT_READ | PROT_WRITE,
        Protection::ReadWriteExecute => PROT_READ | PROT_WRITE | PROT_EXEC,
    }
}

pub(super) fn query_page_info() -> PageInfo {
    // SAFETY: sysconf with a valid name constant never traps; a negative
    // return on failure is mapped to a conservative default.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = if page_size > 0 { page_size as usize } else { 4096 };
    // Unix has no distinct allocation-granularity concept; mmap placement
    // is already page-granular.
    PageInfo { page_size, allocation_granularity: page_size }
}

/// Reserve `size` bytes as an inaccessible anonymous mapping. Later
/// `mprotect` calls turn sub-ranges into committed, accessible memory —
/// on Linux's default overcommit policy this is indistinguishable from a
/// real reserve/commit split, and the reservation is honored as address
/// space regardless of overcommit settings.
pub(super) fn reserve(size: usize) -> io::Result<usize> {
    // SAFETY: anonymous, non-fixed mapping; no file descriptor involved.
    // The kernel validates `size` and chooses the base address itself.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ptr as usize)
    }
}

pub(super) fn commit(base: usize, size: usize, protection: Protection) -> io::Result<()> {
    // SAFETY: caller guarantees `[base, base+size)` lies within a prior
    // `reserve` call and is page-aligned.
    let rc = unsafe { libc::mprotect(base as *mut libc::c_void, size, to_prot(protection)) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub(super) fn commit_guard(base: usize, size: usize) -> io::Result<()> {
    // A PROT_NONE region already traps on first access; re-asserting it
    // here makes the "guard committed" step explicit and idempotent.
    let rc = unsafe { libc::mprotect(base as *mut libc::c_void, size, libc::PROT_NONE) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub(super) fn release(base: usize, size: usize) -> io::Result<()> {
    // SAFETY: caller guarantees `base`/`size` match a prior `reserve` call
    // and that the region is not accessed again afterward.
    let rc = unsafe { libc::munmap(base as *mut libc::c_void, size) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub(super) fn flush_icache(base: usize, size: usize) {
    #[cfg(target_arch = "aarch64")]
    {
        extern "C" {
            fn __clear_cache(begin: *mut libc::c_char, end: *mut libc::c_char);
        }
        // SAFETY: `base`/`size` describe a committed, executable range the
        // caller owns; `__clear_cache` only flushes cache lines, it never
        // dereferences the range's contents.
        unsafe {
            __clear_cache(base as *mut libc::c_char, (base + size) as *mut libc::c_char);
        }
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        // x86_64 has a coherent instruction cache; nothing to flush.
        let _ = (base, size);
    }
}
