//! End-to-end scenarios (spec.md section 8, S1-S6) run directly against
//! this crate's own `extern "C"` entry points, exercising whichever
//! back-end the `passthrough`/`tlsf`/`diagnostic` feature selects. The
//! default feature set used by `cargo test` is `passthrough`.

use heapspect_abi::malloc_abi::{
    aligned_alloc, calloc, free, malloc, malloc_usable_size, memalign, posix_memalign, realloc,
};
use std::ffi::c_void;
use std::ptr;

#[test]
fn s1_small_allocation_roundtrip() {
    // SAFETY: standard malloc/free contract.
    unsafe {
        let p = malloc(1);
        assert!(!p.is_null());
        assert!(malloc_usable_size(p) >= 1);
        ptr::write_bytes(p as *mut u8, b'A', 1);
        free(p);
    }
}

#[test]
fn s2_aligned_request_honored() {
    // SAFETY: standard posix_memalign/free contract.
    unsafe {
        let mut p: *mut c_void = ptr::null_mut();
        let rc = posix_memalign(&mut p, 4096, 1111);
        assert_eq!(rc, 0);
        assert_eq!((p as usize) % 4096, 0);
        assert!(malloc_usable_size(p) >= 1111);
        free(p);
    }
}

#[test]
fn s3_realloc_null_and_zero_edges() {
    // SAFETY: standard realloc contract.
    unsafe {
        let q = realloc(ptr::null_mut(), 0x20);
        assert!(!q.is_null());
        let r = realloc(q, 0);
        assert!(r.is_null());
    }
}

#[test]
fn s4_calloc_zeroes_memory() {
    // SAFETY: standard calloc/free contract.
    unsafe {
        let page = 4096usize;
        let count = 121usize;
        let p = calloc(count, page);
        assert!(!p.is_null());
        let bytes = std::slice::from_raw_parts(p as *const u8, count * page);
        assert!(bytes.iter().all(|&b| b == 0));
        free(p);
    }
}

#[test]
fn s5_memalign_rounds_up_to_valid_alignment() {
    // SAFETY: standard memalign/free contract.
    unsafe {
        let p = memalign(24, 100);
        assert!(!p.is_null());
        assert_eq!((p as usize) % 32, 0);
        free(p);
    }
}

#[test]
fn s6_aligned_alloc_rejects_non_power_of_two() {
    // SAFETY: standard aligned_alloc contract; p is null on this path.
    unsafe {
        let p = aligned_alloc(24, 100);
        assert!(p.is_null());
        assert_eq!(heapspect_core::errno::get_errno(), heapspect_core::errno::EINVAL);
    }
}

#[test]
fn free_of_null_is_a_noop() {
    // SAFETY: free(null) is always defined as a no-op.
    unsafe {
        free(ptr::null_mut());
    }
}

#[test]
fn malloc_usable_size_of_null_is_zero() {
    // SAFETY: malloc_usable_size(null) is always defined as 0.
    unsafe {
        assert_eq!(malloc_usable_size(ptr::null_mut()), 0);
    }
}
