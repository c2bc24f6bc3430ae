//! The public `extern "C"` allocator entry points (C4).
//!
//! Every function here follows the same shape: if the current thread is
//! already inside a guarded call (this function's own back-end reentered
//! us while allocating), fall straight through to the resolved original
//! libc symbol; otherwise enter the guard and dispatch to the
//! process-wide [`crate::state::backend`].

use crate::macros::guarded;
use crate::state;
use heapspect_core::backend::BackEnd;
use heapspect_core::errno::{set_errno, ENOMEM};
use heapspect_core::original;
use std::ffi::c_void;

/// Alignment used for requests with no explicit alignment argument,
/// matching glibc's own minimum `malloc` alignment guarantee.
const DEFAULT_ALIGN: usize = 16;

fn page_size() -> usize {
    // SAFETY: `sysconf` with `_SC_PAGESIZE` has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// A valid alignment is a power of two that is also a multiple of
/// `sizeof(void*)`, matching glibc's own `memalign`-family contract.
fn is_valid_alignment(alignment: usize) -> bool {
    alignment.is_power_of_two() && alignment % std::mem::size_of::<*mut c_void>() == 0
}

/// Smallest power of two `>= x`, or `0` if that would overflow `usize`.
fn next_power_of_two(x: usize) -> usize {
    const MAX_X: usize = 1 << 63;
    if x > MAX_X {
        return 0;
    }
    let mut retval = 1usize;
    while retval < x {
        retval <<= 1;
    }
    retval
}

/// POSIX `malloc` — allocates `size` bytes of uninitialized memory.
///
/// Returns a pointer to the allocated memory, or null (with `errno` set to
/// `ENOMEM`) on failure.
///
/// # Safety
/// The caller must eventually pass the returned pointer to `free` exactly
/// once, and must not read from it before writing (its contents are
/// uninitialized).
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    guarded!(
        reentrant: {
            // SAFETY: bypasses the back-end entirely to avoid recursing
            // back into it while it is already mid-allocation.
            match original::original_malloc() {
                Some(f) => unsafe { f(size) },
                None => std::ptr::null_mut(),
            }
        },
        normal: match state::backend().alloc(size, DEFAULT_ALIGN) {
            Some(ptr) => ptr.cast(),
            None => {
                set_errno(ENOMEM);
                std::ptr::null_mut()
            }
        },
    )
}

/// POSIX `free` — releases memory previously returned by `malloc`,
/// `calloc`, `realloc`, `posix_memalign`, `memalign`, `aligned_alloc`,
/// `valloc`, or `pvalloc`. A null `ptr` is a documented no-op.
///
/// # Safety
/// `ptr` must be null or have been returned by one of the allocation
/// functions above, and must not already have been freed.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    guarded!(
        reentrant: {
            if let Some(f) = original::original_free() {
                // SAFETY: forwarded from this function's own caller contract.
                unsafe { f(ptr) };
            }
        },
        normal: {
            // SAFETY: forwarded from this function's own caller contract.
            unsafe { state::backend().dealloc(ptr.cast()) };
        },
    )
}

/// POSIX `calloc` — allocates space for `nmemb` elements of `size` bytes
/// each, zero-initialized. Returns null (with `errno` set to `ENOMEM`) on
/// overflow or allocation failure.
///
/// # Safety
/// The caller must eventually pass the returned pointer to `free` exactly
/// once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    let Some(total) = nmemb.checked_mul(size) else {
        set_errno(ENOMEM);
        return std::ptr::null_mut();
    };
    guarded!(
        reentrant: {
            match original::original_calloc() {
                Some(f) => unsafe { f(nmemb, size) },
                None => std::ptr::null_mut(),
            }
        },
        normal: match state::backend().alloc_zeroed(total, DEFAULT_ALIGN) {
            Some(ptr) => ptr.cast(),
            None => {
                set_errno(ENOMEM);
                std::ptr::null_mut()
            }
        },
    )
}

/// POSIX `realloc` — resizes the block at `ptr` to `size` bytes, preserving
/// existing content up to the lesser of the old and new sizes. `ptr ==
/// NULL` behaves as `malloc(size)`; `size == 0` behaves as `free(ptr)`
/// followed by returning null, matching glibc's historical behavior.
///
/// # Safety
/// `ptr` must be null or a live pointer from one of this module's
/// allocation functions.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        // SAFETY: delegating to `malloc`'s own contract.
        return unsafe { malloc(size) };
    }
    if size == 0 {
        // SAFETY: delegating to `free`'s own contract.
        unsafe { free(ptr) };
        return std::ptr::null_mut();
    }
    guarded!(
        reentrant: {
            match original::original_realloc() {
                Some(f) => unsafe { f(ptr, size) },
                None => std::ptr::null_mut(),
            }
        },
        normal: {
            // SAFETY: forwarded from this function's own caller contract.
            match unsafe { state::backend().realloc(ptr.cast(), DEFAULT_ALIGN, size) } {
                Some(new_ptr) => new_ptr.cast(),
                None => {
                    set_errno(ENOMEM);
                    std::ptr::null_mut()
                }
            }
        },
    )
}

/// POSIX `posix_memalign` — allocates `size` bytes aligned to `alignment`
/// (which must be a power of two and a multiple of `sizeof(void*)`),
/// writing the result to `*memptr`.
///
/// Returns `0` on success, `EINVAL` if `alignment` is invalid, or `ENOMEM`
/// on allocation failure. `*memptr` is left unmodified on failure, per
/// POSIX.
///
/// # Safety
/// `memptr` must be a valid, aligned pointer to a `*mut c_void` the caller
/// owns.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> i32 {
    if !is_valid_alignment(alignment) {
        return libc::EINVAL;
    }
    guarded!(
        reentrant: {
            match original::original_posix_memalign() {
                Some(f) => unsafe { f(memptr, alignment, size) },
                None => libc::ENOMEM,
            }
        },
        normal: match state::backend().alloc(size, alignment) {
            Some(ptr) => {
                // SAFETY: `memptr` is a valid pointer per this function's contract.
                unsafe { memptr.write(ptr.cast()) };
                0
            }
            None => libc::ENOMEM,
        },
    )
}

/// glibc legacy `memalign` — allocates `size` bytes aligned to `alignment`.
/// Unlike `posix_memalign`/`aligned_alloc`, an `alignment` that is not a
/// power of two (or not a multiple of `sizeof(void*)`) is not rejected: it
/// is rounded up to the next valid alignment instead. Returns null (with
/// `errno` set to `EINVAL`) only if `alignment` is so large that no power
/// of two can represent it.
///
/// # Safety
/// The caller must eventually pass the returned pointer to `free` exactly
/// once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    let alignment = if is_valid_alignment(alignment) {
        alignment
    } else {
        next_power_of_two(alignment)
    };
    if alignment == 0 {
        set_errno(libc::EINVAL);
        return std::ptr::null_mut();
    }
    let size = if size == 0 { 1 } else { size };
    guarded!(
        reentrant: std::ptr::null_mut(),
        normal: match state::backend().alloc(size, alignment) {
            Some(ptr) => ptr.cast(),
            None => {
                set_errno(ENOMEM);
                std::ptr::null_mut()
            }
        },
    )
}

/// C11 `aligned_alloc` — allocates `size` bytes aligned to `alignment`.
/// Unlike `memalign`, an invalid `alignment` (not a power of two, or not a
/// multiple of `sizeof(void*)`) is rejected outright: returns null with
/// `errno` set to `EINVAL`, rather than rounding up. `size` is not
/// required to be a multiple of `alignment` (see `DESIGN.md`).
///
/// # Safety
/// The caller must eventually pass the returned pointer to `free` exactly
/// once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    if !is_valid_alignment(alignment) {
        set_errno(libc::EINVAL);
        return std::ptr::null_mut();
    }
    let size = if size == 0 { 1 } else { size };
    guarded!(
        reentrant: std::ptr::null_mut(),
        normal: match state::backend().alloc(size, alignment) {
            Some(ptr) => ptr.cast(),
            None => {
                set_errno(ENOMEM);
                std::ptr::null_mut()
            }
        },
    )
}

/// glibc legacy `valloc` — allocates `size` bytes aligned to the system
/// page size.
///
/// # Safety
/// The caller must eventually pass the returned pointer to `free` exactly
/// once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    // SAFETY: delegating to `memalign`'s own contract.
    unsafe { memalign(page_size(), size) }
}

/// glibc legacy `pvalloc` — allocates `size` bytes, rounded up to a whole
/// number of pages, aligned to the system page size.
///
/// # Safety
/// The caller must eventually pass the returned pointer to `free` exactly
/// once.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn pvalloc(size: usize) -> *mut c_void {
    let page = page_size();
    let rounded = size.div_ceil(page).saturating_mul(page);
    // SAFETY: delegating to `memalign`'s own contract.
    unsafe { memalign(page, rounded) }
}

/// glibc extension `malloc_usable_size` — returns the actual usable size
/// of the block at `ptr`, which is always at least the size it was
/// requested with.
///
/// # Safety
/// `ptr` must be null or a live pointer from one of this module's
/// allocation functions.
#[cfg_attr(not(debug_assertions), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    if ptr.is_null() {
        return 0;
    }
    guarded!(
        reentrant: match original::original_malloc_usable_size() {
            // SAFETY: forwarded from this function's own caller contract.
            Some(f) => unsafe { f(ptr) },
            None => 0,
        },
        normal: {
            // SAFETY: forwarded from this function's own caller contract.
            unsafe { state::backend().block_size(ptr.cast()) }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_free_roundtrip() {
        // SAFETY: standard malloc/free pairing under test.
        unsafe {
            let ptr = malloc(128);
            assert!(!ptr.is_null());
            assert!(malloc_usable_size(ptr) >= 128);
            free(ptr);
        }
    }

    #[test]
    fn free_of_null_is_noop() {
        // SAFETY: null is the documented no-op case.
        unsafe { free(std::ptr::null_mut()) };
    }

    #[test]
    fn calloc_zeroes_memory() {
        // SAFETY: standard calloc/free pairing under test.
        unsafe {
            let ptr = calloc(16, 8);
            assert!(!ptr.is_null());
            let slice = std::slice::from_raw_parts(ptr.cast::<u8>(), 128);
            assert!(slice.iter().all(|&b| b == 0));
            free(ptr);
        }
    }

    #[test]
    fn calloc_overflow_returns_null() {
        // SAFETY: arguments are deliberately overflowing; no memory is touched.
        unsafe {
            let ptr = calloc(usize::MAX, 2);
            assert!(ptr.is_null());
        }
    }

    #[test]
    fn realloc_null_behaves_as_malloc() {
        // SAFETY: delegating case under test.
        unsafe {
            let ptr = realloc(std::ptr::null_mut(), 64);
            assert!(!ptr.is_null());
            free(ptr);
        }
    }

    #[test]
    fn realloc_zero_size_frees_and_returns_null() {
        // SAFETY: standard malloc/realloc pairing under test.
        unsafe {
            let ptr = malloc(64);
            let result = realloc(ptr, 0);
            assert!(result.is_null());
        }
    }

    #[test]
    fn posix_memalign_rejects_bad_alignment() {
        let mut out: *mut c_void = std::ptr::null_mut();
        // SAFETY: `out` is a valid local variable's address.
        let rc = unsafe { posix_memalign(&raw mut out, 3, 64) };
        assert_eq!(rc, libc::EINVAL);
    }

    #[test]
    fn posix_memalign_succeeds_with_valid_alignment() {
        let mut out: *mut c_void = std::ptr::null_mut();
        // SAFETY: `out` is a valid local variable's address.
        let rc = unsafe { posix_memalign(&raw mut out, 64, 128) };
        assert_eq!(rc, 0);
        assert_eq!(out as usize % 64, 0);
        // SAFETY: `out` came from `posix_memalign` above.
        unsafe { free(out) };
    }

    #[test]
    fn aligned_alloc_honors_alignment() {
        // SAFETY: standard aligned_alloc/free pairing under test.
        unsafe {
            let ptr = aligned_alloc(256, 64);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % 256, 0);
            free(ptr);
        }
    }

    #[test]
    fn aligned_alloc_rejects_non_power_of_two() {
        // SAFETY: no memory is touched on the rejected path.
        unsafe {
            let ptr = aligned_alloc(24, 100);
            assert!(ptr.is_null());
            assert_eq!(heapspect_core::errno::get_errno(), libc::EINVAL);
        }
    }

    #[test]
    fn memalign_rounds_non_power_of_two_up() {
        // SAFETY: standard memalign/free pairing under test.
        unsafe {
            let ptr = memalign(24, 100);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % 32, 0);
            free(ptr);
        }
    }

    #[test]
    fn valloc_aligns_to_page_size() {
        // SAFETY: standard valloc/free pairing under test.
        unsafe {
            let ptr = valloc(128);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % page_size(), 0);
            free(ptr);
        }
    }
}
