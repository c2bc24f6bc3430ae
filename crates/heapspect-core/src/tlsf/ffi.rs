//! Raw bindings to the external TLSF (Two-Level Segregated Fit) engine.
//!
//! The TLSF free-list algorithm itself is treated as an opaque, already
//! battle-tested C primitive (the canonical `tlsf.h`/`tlsf.c` by Matthew
//! Conte) — this module only declares its ABI and does not reimplement any
//! of its internal bitmap/free-list logic. The static library is expected
//! to be linked in by the final binary's build (see the workspace root's
//! build notes in `DESIGN.md`); this crate only promises the signatures.

#![allow(unsafe_code)]

use std::ffi::c_void;

unsafe extern "C" {
    /// Initializes a TLSF control structure inside `mem` (which must be at
    /// least `tlsf_size()` bytes) and adds `[mem, mem+bytes)` as its first
    /// pool. Returns an opaque control-block pointer, or null on failure.
    pub fn tlsf_create_with_pool(mem: *mut c_void, bytes: usize) -> *mut c_void;

    /// Adds an additional memory region as a pool to an existing control
    /// block. Returns an opaque pool handle, or null on failure.
    pub fn tlsf_add_pool(tlsf: *mut c_void, mem: *mut c_void, bytes: usize) -> *mut c_void;

    /// Allocates `size` bytes from the given control block's pools.
    pub fn tlsf_malloc(tlsf: *mut c_void, size: usize) -> *mut c_void;

    /// Allocates `size` bytes aligned to `align` (a power of two).
    pub fn tlsf_memalign(tlsf: *mut c_void, align: usize, size: usize) -> *mut c_void;

    /// Resizes a block previously returned by this control block to
    /// `size` bytes, possibly moving it.
    pub fn tlsf_realloc(tlsf: *mut c_void, ptr: *mut c_void, size: usize) -> *mut c_void;

    /// Releases a block previously returned by this control block.
    pub fn tlsf_free(tlsf: *mut c_void, ptr: *mut c_void);

    /// Returns the usable size of a live block.
    pub fn tlsf_block_size(ptr: *mut c_void) -> usize;

    /// Returns the number of bytes the control structure itself occupies,
    /// used to size the memory handed to `tlsf_create_with_pool`.
    pub fn tlsf_size() -> usize;

    /// Returns the per-pool bookkeeping overhead in bytes.
    pub fn tlsf_pool_overhead() -> usize;
}
