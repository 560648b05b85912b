//! Windows virtual-memory backend via `VirtualAlloc`/`VirtualProtect`/`VirtualFree`.

use std::io;
use std::ptr;

use winapi::um::memoryapi::{VirtualAlloc, VirtualFree, VirtualProtect};
use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
use winapi::um::winnt::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READWRITE, PAGE_GUARD, PAGE_NOACCESS,
    PAGE_READONLY, PAGE_READWRITE,
};

use super::{PageInfo, Protection};

fn to_page_protect(protection: Protection) -> u32 {
    match protection {
        Protection::ReadOnly => PAGE_READONLY,
        Protection::ReadWrite => PAGE_READWRITE,
        Protection::ReadWriteExecute => PAGE_EXECUTE_READWRITE,
    }
}

pub(super) fn query_page_info() -> PageInfo {
    // SAFETY: `info` is a valid, zero-initialized SYSTEM_INFO the API fills in.
    let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
    unsafe { GetSystemInfo(&mut info) };
    PageInfo {
        page_size: info.dwPageSize as usize,
        allocation_granularity: info.dwAllocationGranularity as usize,
    }
}

pub(super) fn reserve(size: usize) -> io::Result<usize> {
    // SAFETY: null address lets the OS choose the base; MEM_RESERVE does
    // not back the range with memory yet.
    let ptr = unsafe {
        VirtualAlloc(ptr::null_mut(), size, MEM_RESERVE, PAGE_NOACCESS)
    };
    if ptr.is_null() {
        Err(io::Error::last_os_error())
    } else {
        Ok(ptr as usize)
    }
}

pub(super) fn commit(base: usize, size: usize, protection: Protection) -> io::Result<()> {
    // SAFETY: caller guarantees `[base, base+size)` lies within a prior
    // reservation. MEM_COMMIT on an already-reserved range backs it with
    // memory under the requested protection.
    let ptr = unsafe {
        VirtualAlloc(base as *mut _, size, MEM_COMMIT, to_page_protect(protection))
    };
    if ptr.is_null() {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub(super) fn commit_guard(base: usize, size: usize) -> io::Result<()> {
    // SAFETY: see `commit`; PAGE_GUARD traps on first access and then
    // clears itself, matching the "one-shot overrun detector" contract.
    let ptr = unsafe {
        VirtualAlloc(base as *mut _, size, MEM_COMMIT, PAGE_READWRITE | PAGE_GUARD)
    };
    if ptr.is_null() {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub(super) fn release(base: usize, _size: usize) -> io::Result<()> {
    // SAFETY: caller guarantees `base` was returned by `reserve` and that
    // the region is not accessed again. MEM_RELEASE requires a size of 0
    // and releases the entire reservation.
    let rc = unsafe { VirtualFree(base as *mut _, 0, MEM_RELEASE) };
    if rc == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

pub(super) fn flush_icache(base: usize, size: usize) {
    use winapi::um::processthreadsapi::{FlushInstructionCache, GetCurrentProcess};
    // SAFETY: `base`/`size` describe a committed, executable range the
    // caller owns; the call only flushes cache lines.
    unsafe {
        FlushInstructionCache(GetCurrentProcess(), base as *const _, size);
    }
}
