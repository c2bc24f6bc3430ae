//! The passthrough back-end: forwards every request to the original libc
//! allocator resolved via [`crate::original`].
//!
//! This is the default back-end. It exists so that loading the interposer
//! at all has close to zero behavioral effect beyond whatever bookkeeping
//! a build opts into — useful as a baseline for comparing the TLSF and
//! diagnostic back-ends, and as the safe fallback if a build is configured
//! with no back-end feature at all.

#![allow(unsafe_code)]

use crate::backend::BackEnd;
use crate::config;
use crate::original;
use std::ffi::c_void;
use std::sync::Once;

/// Forwards every allocation request to the libc resolved at the next
/// link step in the preload chain.
pub struct PassthroughBackEnd;

impl Default for PassthroughBackEnd {
    fn default() -> Self {
        Self::new()
    }
}

static PRE_RESERVE: Once = Once::new();

/// Extends the program break by `INITIAL_SBRK_SIZE` bytes and zero-touches
/// the pages, then sets `mallopt(M_MMAP_THRESHOLD, MMAP_THRESHOLD)` so large
/// allocations stay in the sbrk arena instead of getting their own `mmap`
/// region. Runs at most once per process; failures are left to the caller
/// to notice via a subsequent allocation falling back to `mmap` as usual,
/// since this reservation is a placement optimization, not a correctness
/// requirement.
fn pre_reserve_sbrk_arena() {
    PRE_RESERVE.call_once(|| {
        let size = config::initial_sbrk_size();
        // SAFETY: `sbrk` has no preconditions beyond a valid increment; a
        // negative return (`(void*)-1`) just means the break couldn't be
        // extended, which we treat as "skip the optimization".
        let base = unsafe { libc::sbrk(size as libc::intptr_t) };
        if base == usize::MAX as *mut c_void {
            return;
        }
        // SAFETY: `sbrk` just extended the break by exactly `size` bytes
        // starting at `base`, so this range is ours to zero.
        unsafe { std::ptr::write_bytes(base.cast::<u8>(), 0, size) };

        let threshold = config::mmap_threshold();
        // SAFETY: `mallopt` has no preconditions; an unsupported `param` or
        // out-of-range `value` is simply ignored by glibc.
        unsafe { libc::mallopt(libc::M_MMAP_THRESHOLD, threshold as libc::c_int) };
    });
}

impl PassthroughBackEnd {
    #[must_use]
    pub fn new() -> Self {
        pre_reserve_sbrk_arena();
        Self
    }
}

impl BackEnd for PassthroughBackEnd {
    fn alloc(&self, size: usize, align: usize) -> Option<*mut u8> {
        if align <= std::mem::align_of::<libc::max_align_t>() {
            let malloc = original::original_malloc()?;
            // SAFETY: `malloc` is the resolved libc `malloc`, called with a
            // valid size.
            let ptr = unsafe { malloc(size) };
            return if ptr.is_null() {
                None
            } else {
                Some(ptr.cast())
            };
        }

        let posix_memalign = original::original_posix_memalign()?;
        let mut out: *mut c_void = std::ptr::null_mut();
        // SAFETY: `out` is a valid pointer to write the result into, `align`
        // is a power of two by this function's contract.
        let rc = unsafe { posix_memalign(&raw mut out, align, size) };
        if rc != 0 || out.is_null() {
            return None;
        }
        Some(out.cast())
    }

    unsafe fn dealloc(&self, ptr: *mut u8) {
        let Some(free) = original::original_free() else {
            return;
        };
        // SAFETY: `ptr` originated from `malloc`/`posix_memalign` above,
        // forwarded by this function's caller contract.
        unsafe { free(ptr.cast()) };
    }

    unsafe fn block_size(&self, ptr: *mut u8) -> usize {
        match original::original_malloc_usable_size() {
            // SAFETY: `ptr` is a live allocation from this back-end.
            Some(usable_size) => unsafe { usable_size(ptr.cast()) },
            None => 0,
        }
    }

    fn alloc_zeroed(&self, size: usize, align: usize) -> Option<*mut u8> {
        if align <= std::mem::align_of::<libc::max_align_t>() {
            let calloc = original::original_calloc()?;
            // SAFETY: `calloc` is the resolved libc `calloc`.
            let ptr = unsafe { calloc(1, size) };
            return if ptr.is_null() {
                None
            } else {
                Some(ptr.cast())
            };
        }
        let ptr = self.alloc(size, align)?;
        // SAFETY: `alloc` just returned a fresh block of at least `size`
        // bytes.
        unsafe { std::ptr::write_bytes(ptr, 0, size) };
        Some(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, old_align: usize, new_size: usize) -> Option<*mut u8> {
        if old_align <= std::mem::align_of::<libc::max_align_t>() {
            let realloc = original::original_realloc()?;
            // SAFETY: `ptr` is a live libc allocation and `new_size` is the
            // caller's requested size.
            let new_ptr = unsafe { realloc(ptr.cast(), new_size) };
            return if new_ptr.is_null() {
                None
            } else {
                Some(new_ptr.cast())
            };
        }
        // Overaligned blocks can't be resized with plain `realloc` since it
        // doesn't preserve alignment > the platform default; fall back to
        // the default copy-and-free behavior.
        // SAFETY: forwarded from this function's own caller contract.
        unsafe { crate::backend::default_realloc(self, ptr, old_align, new_size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_small_allocation() {
        let be = PassthroughBackEnd::new();
        let ptr = be.alloc(64, 8).expect("alloc");
        assert!(!ptr.is_null());
        // SAFETY: ptr is live, 64 bytes, alignment 8.
        unsafe {
            std::ptr::write_bytes(ptr, 0x42, 64);
            assert!(be.block_size(ptr) >= 64);
            be.dealloc(ptr);
        }
    }

    #[test]
    fn zeroed_allocation_is_actually_zero() {
        let be = PassthroughBackEnd::new();
        let ptr = be.alloc_zeroed(128, 8).expect("alloc_zeroed");
        // SAFETY: ptr has 128 live bytes.
        let slice = unsafe { std::slice::from_raw_parts(ptr, 128) };
        assert!(slice.iter().all(|&b| b == 0));
        // SAFETY: ptr came from this back-end.
        unsafe { be.dealloc(ptr) };
    }

    #[test]
    fn realloc_grows_and_preserves_prefix() {
        let be = PassthroughBackEnd::new();
        let ptr = be.alloc(16, 8).expect("alloc");
        // SAFETY: ptr has 16 live bytes.
        unsafe { std::ptr::write_bytes(ptr, 0x7, 16) };
        // SAFETY: ptr is live with alignment 8.
        let grown = unsafe { be.realloc(ptr, 8, 256) }.expect("realloc");
        // SAFETY: grown has at least 16 live bytes from the original content.
        let slice = unsafe { std::slice::from_raw_parts(grown, 16) };
        assert_eq!(slice, &[0x7; 16]);
        // SAFETY: grown came from this back-end.
        unsafe { be.dealloc(grown) };
    }

    #[test]
    fn overaligned_request_honors_alignment() {
        let be = PassthroughBackEnd::new();
        let ptr = be.alloc(64, 4096).expect("alloc");
        assert_eq!(ptr as usize % 4096, 0);
        // SAFETY: ptr came from this back-end.
        unsafe { be.dealloc(ptr) };
    }
}
