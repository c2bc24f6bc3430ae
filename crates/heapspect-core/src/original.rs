//! Resolution of the original libc allocator symbols via `dlsym(RTLD_NEXT, ..)`.
//!
//! This is how the passthrough and diagnostic back-ends (and the TLSF
//! back-end's pool-growth path) reach "the libc that would have run if we
//! weren't preloaded" without calling back into our own interposed
//! symbols. Every resolved pointer is cached in a process-wide
//! [`AtomicPtr`] the first time it's needed; `dlsym` itself is safe to call
//! repeatedly but not free, so caching avoids a `dlsym` round trip on every
//! allocation.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};

type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
type FreeFn = unsafe extern "C" fn(*mut c_void);
type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;
type PosixMemalignFn = unsafe extern "C" fn(*mut *mut c_void, usize, usize) -> i32;
type MallocUsableSizeFn = unsafe extern "C" fn(*mut c_void) -> usize;

static MALLOC: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static FREE: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static CALLOC: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static REALLOC: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static POSIX_MEMALIGN: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static MALLOC_USABLE_SIZE: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

/// Resolves `name` via `dlsym(RTLD_NEXT, name)`, caching the result in
/// `cell`. Returns `None` if the dynamic loader has no next definition,
/// which would indicate a broken preload chain.
fn resolve(cell: &AtomicPtr<c_void>, name: &'static str) -> Option<*mut c_void> {
    let cached = cell.load(Ordering::Acquire);
    if !cached.is_null() {
        return Some(cached);
    }

    // name is a static C string literal's bytes; append the NUL ourselves
    // since we can't depend on CStr literals existing at const time here.
    let mut buf = [0u8; 32];
    let bytes = name.as_bytes();
    assert!(bytes.len() < buf.len(), "symbol name too long: {name}");
    buf[..bytes.len()].copy_from_slice(bytes);

    // SAFETY: `buf` is a NUL-terminated byte buffer holding a valid C
    // string, and `RTLD_NEXT` is the documented sentinel for "search only
    // in objects loaded after this one" — safe to pass to `dlsym`.
    let resolved = unsafe { libc::dlsym(libc::RTLD_NEXT, buf.as_ptr().cast()) };
    if resolved.is_null() {
        return None;
    }
    cell.store(resolved, Ordering::Release);
    Some(resolved)
}

macro_rules! original_fn {
    ($fn_name:ident, $cell:expr, $sym:literal, $ty:ty) => {
        /// Returns the resolved original libc symbol, or `None` if the
        /// preload chain has nothing further to resolve to.
        pub fn $fn_name() -> Option<$ty> {
            let raw = resolve(&$cell, $sym)?;
            // SAFETY: `raw` was resolved from a libc symbol of this exact
            // C signature via `dlsym`.
            Some(unsafe { std::mem::transmute::<*mut c_void, $ty>(raw) })
        }
    };
}

original_fn!(original_malloc, MALLOC, "malloc", MallocFn);
original_fn!(original_free, FREE, "free", FreeFn);
original_fn!(original_calloc, CALLOC, "calloc", CallocFn);
original_fn!(original_realloc, REALLOC, "realloc", ReallocFn);
original_fn!(
    original_posix_memalign,
    POSIX_MEMALIGN,
    "posix_memalign",
    PosixMemalignFn
);
original_fn!(
    original_malloc_usable_size,
    MALLOC_USABLE_SIZE,
    "malloc_usable_size",
    MallocUsableSizeFn
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_malloc_and_free() {
        let malloc = original_malloc().expect("original malloc must resolve under test harness");
        let free = original_free().expect("original free must resolve under test harness");
        // SAFETY: both are real libc symbols called with valid arguments.
        unsafe {
            let p = malloc(16);
            assert!(!p.is_null());
            free(p);
        }
    }

    #[test]
    fn resolution_is_cached() {
        let first = original_malloc().unwrap() as usize;
        let second = original_malloc().unwrap() as usize;
        assert_eq!(first, second);
    }
}
