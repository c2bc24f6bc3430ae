//! Exit-introspection glibc extensions: `mallinfo`, `mallinfo2`, `mallopt`,
//! `malloc_trim`, `malloc_stats`, `malloc_info`.
//!
//! None of these report anything about `heapspect`'s own back-ends — they
//! forward straight to the original libc symbols resolved via `dlsym`, the
//! same way [`heapspect_core::original`] resolves the core allocator
//! family. They exist only so that a program calling them under
//! `LD_PRELOAD` gets a real answer (from the underlying glibc arena)
//! instead of a missing symbol at link time.

#![allow(non_camel_case_types)]

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Traditional glibc `struct mallinfo` (all fields are plain `int`, per
/// the historical, still-supported ABI).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct mallinfo {
    pub arena: i32,
    pub ordblks: i32,
    pub smblks: i32,
    pub hblks: i32,
    pub hblkhd: i32,
    pub usmblks: i32,
    pub fsmblks: i32,
    pub uordblks: i32,
    pub fordblks: i32,
    pub keepcost: i32,
}

/// `struct mallinfo2`, glibc's overflow-safe successor to `mallinfo` with
/// `size_t`-width fields.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct mallinfo2 {
    pub arena: usize,
    pub ordblks: usize,
    pub smblks: usize,
    pub hblks: usize,
    pub hblkhd: usize,
    pub usmblks: usize,
    pub fsmblks: usize,
    pub uordblks: usize,
    pub fordblks: usize,
    pub keepcost: usize,
}

type MallinfoFn = unsafe extern "C" fn() -> mallinfo;
type Mallinfo2Fn = unsafe extern "C" fn() -> mallinfo2;
type MalloptFn = unsafe extern "C" fn(i32, i32) -> i32;
type MallocTrimFn = unsafe extern "C" fn(usize) -> i32;
type MallocStatsFn = unsafe extern "C" fn();
type MallocInfoFn = unsafe extern "C" fn(i32, *mut libc::FILE) -> i32;

static MALLINFO: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static MALLINFO2: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static MALLOPT: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static MALLOC_TRIM: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static MALLOC_STATS: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static MALLOC_INFO: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

fn resolve(cell: &AtomicPtr<c_void>, name: &'static str) -> Option<*mut c_void> {
    let cached = cell.load(Ordering::Acquire);
    if !cached.is_null() {
        return Some(cached);
    }
    let mut buf = [0u8; 24];
    let bytes = name.as_bytes();
    assert!(bytes.len() < buf.len(), "symbol name too long: {name}");
    buf[..bytes.len()].copy_from_slice(bytes);
    // SAFETY: `buf` holds a valid NUL-terminated C string.
    let resolved = unsafe { libc::dlsym(libc::RTLD_NEXT, buf.as_ptr().cast()) };
    if resolved.is_null() {
        return None;
    }
    cell.store(resolved, Ordering::Release);
    Some(resolved)
}

/// glibc extension `mallinfo` — statistics about the underlying (real
/// libc) heap, forwarded unchanged.
///
/// # Safety
/// No preconditions beyond the standard `extern "C"` ABI contract.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn mallinfo() -> mallinfo {
    match resolve(&MALLINFO, "mallinfo") {
        // SAFETY: resolved from the real `mallinfo` via `dlsym`.
        Some(raw) => unsafe { std::mem::transmute::<*mut c_void, MallinfoFn>(raw)() },
        None => mallinfo::default(),
    }
}

/// glibc extension `mallinfo2` — `size_t`-width successor to `mallinfo`,
/// forwarded unchanged.
///
/// # Safety
/// No preconditions beyond the standard `extern "C"` ABI contract.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn mallinfo2() -> mallinfo2 {
    match resolve(&MALLINFO2, "mallinfo2") {
        // SAFETY: resolved from the real `mallinfo2` via `dlsym`.
        Some(raw) => unsafe { std::mem::transmute::<*mut c_void, Mallinfo2Fn>(raw)() },
        None => mallinfo2::default(),
    }
}

/// glibc extension `mallopt` — tunes the underlying (real libc) allocator;
/// has no effect on `heapspect`'s own back-ends.
///
/// # Safety
/// No preconditions beyond the standard `extern "C"` ABI contract.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn mallopt(param: i32, value: i32) -> i32 {
    match resolve(&MALLOPT, "mallopt") {
        // SAFETY: resolved from the real `mallopt` via `dlsym`.
        Some(raw) => unsafe { std::mem::transmute::<*mut c_void, MalloptFn>(raw)(param, value) },
        None => 0,
    }
}

/// glibc extension `malloc_trim` — releases free top-of-heap memory back
/// to the OS in the underlying (real libc) allocator.
///
/// # Safety
/// No preconditions beyond the standard `extern "C"` ABI contract.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_trim(pad: usize) -> i32 {
    match resolve(&MALLOC_TRIM, "malloc_trim") {
        // SAFETY: resolved from the real `malloc_trim` via `dlsym`.
        Some(raw) => unsafe { std::mem::transmute::<*mut c_void, MallocTrimFn>(raw)(pad) },
        None => 0,
    }
}

/// glibc extension `malloc_stats` — prints heap statistics for the
/// underlying (real libc) allocator to stderr.
///
/// # Safety
/// No preconditions beyond the standard `extern "C"` ABI contract.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_stats() {
    if let Some(raw) = resolve(&MALLOC_STATS, "malloc_stats") {
        // SAFETY: resolved from the real `malloc_stats` via `dlsym`.
        unsafe { std::mem::transmute::<*mut c_void, MallocStatsFn>(raw)() };
    }
}

/// glibc extension `malloc_info` — writes an XML heap report for the
/// underlying (real libc) allocator to `stream`.
///
/// # Safety
/// `stream` must be a valid, open `FILE*`.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_info(options: i32, stream: *mut libc::FILE) -> i32 {
    match resolve(&MALLOC_INFO, "malloc_info") {
        // SAFETY: resolved from the real `malloc_info` via `dlsym`; `stream`
        // is forwarded from this function's own caller contract.
        Some(raw) => unsafe {
            std::mem::transmute::<*mut c_void, MallocInfoFn>(raw)(options, stream)
        },
        None => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mallinfo_forwards_without_panicking() {
        // SAFETY: no preconditions.
        let info = unsafe { mallinfo() };
        let _ = info.arena;
    }

    #[test]
    fn malloc_trim_forwards_without_panicking() {
        // SAFETY: no preconditions.
        let rc = unsafe { malloc_trim(0) };
        assert!(rc == 0 || rc == 1);
    }
}
