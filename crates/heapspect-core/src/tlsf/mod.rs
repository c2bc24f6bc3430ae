//! The TLSF back-end: deterministic, low-jitter allocation serviced from
//! anonymous-`mmap` pool regions through an external TLSF engine.
//!
//! The engine itself ([`ffi`]) is an opaque black box; everything in this
//! module is the Rust-side plumbing around it — pool growth, the
//! aligned-block header scheme ([`header`]), and making the whole thing
//! safe to call from multiple threads via a single [`parking_lot::Mutex`]
//! guarding the control block.

#![allow(unsafe_code)]

mod ffi;
pub mod header;

use crate::backend::BackEnd;
use crate::config;
use parking_lot::Mutex;
use std::ffi::c_void;

/// Default alignment used for ordinary (non-`memalign`) requests, matching
/// glibc's own minimum malloc alignment guarantee on 64-bit targets.
const DEFAULT_ALIGN: usize = 16;

/// A raw pointer wrapper so [`TlsfState`] can live inside a [`Mutex`];
/// access is always serialized by that mutex, so the `Send` we assert here
/// never lets two threads touch the control block concurrently.
struct RawPtr(*mut c_void);

// SAFETY: every access to the wrapped pointer happens while holding the
// `Mutex<TlsfState>` lock.
unsafe impl Send for RawPtr {}

struct TlsfState {
    control: RawPtr,
    /// `(base, len)` of every pool region mapped so far, kept alive for the
    /// lifetime of the process; TLSF pools are never unmapped since the
    /// engine may still reference interior free-list nodes in them.
    pools: Vec<(RawPtr, usize)>,
}

/// Services allocations from growable `mmap`-backed pools via the TLSF
/// free-list engine.
pub struct TlsfBackEnd {
    state: Mutex<TlsfState>,
}

impl TlsfBackEnd {
    /// Maps the initial pool (sized from `INITIAL_MEMPOOL_SIZE`) and
    /// initializes the TLSF control block inside it.
    ///
    /// Returns `None` if the initial mapping or control-block init fails;
    /// callers should treat this as "TLSF unavailable" and fall back to
    /// another back-end.
    #[must_use]
    pub fn new() -> Option<Self> {
        let overhead = unsafe { ffi::tlsf_size() };
        let requested = config::initial_mempool_size();
        let len = overhead.checked_add(requested)?;
        let base = map_pool(len)?;

        // SAFETY: `base` is a fresh, writable mapping of at least `len`
        // bytes, which is what `tlsf_create_with_pool` requires.
        let control = unsafe { ffi::tlsf_create_with_pool(base, len) };
        if control.is_null() {
            // SAFETY: `base`/`len` came from our own successful `map_pool`.
            unsafe { unmap_pool(base, len) };
            return None;
        }

        Some(Self {
            state: Mutex::new(TlsfState {
                control: RawPtr(control),
                pools: vec![(RawPtr(base), len)],
            }),
        })
    }

    /// Maps and registers one more pool region, sized from
    /// `ADDITIONAL_MEMPOOL_SIZE` (or `at_least` bytes if that request alone
    /// wouldn't satisfy it).
    fn grow(&self, state: &mut TlsfState, at_least: usize) -> bool {
        let overhead = unsafe { ffi::tlsf_pool_overhead() };
        let len = config::additional_mempool_size()
            .max(at_least.saturating_add(overhead))
            .checked_add(overhead);
        let Some(len) = len else { return false };
        let Some(base) = map_pool(len) else {
            return false;
        };

        // SAFETY: `base` is a fresh, writable mapping of `len` bytes and
        // `state.control.0` is the live control block created in `new`.
        let pool = unsafe { ffi::tlsf_add_pool(state.control.0, base, len) };
        if pool.is_null() {
            // SAFETY: `base`/`len` came from our own successful `map_pool`.
            unsafe { unmap_pool(base, len) };
            return false;
        }
        state.pools.push((RawPtr(base), len));
        true
    }
}

impl BackEnd for TlsfBackEnd {
    fn alloc(&self, size: usize, align: usize) -> Option<*mut u8> {
        let align = align.max(DEFAULT_ALIGN);
        let offset = header::padded_size(align);
        let total = offset.checked_add(size)?;

        let mut state = self.state.lock();
        // SAFETY: `state.control.0` is the live control block from `new`.
        let mut p0 = unsafe { ffi::tlsf_memalign(state.control.0, offset, total) };
        if p0.is_null() && self.grow(&mut state, total) {
            // SAFETY: same control block, now with an additional pool.
            p0 = unsafe { ffi::tlsf_memalign(state.control.0, offset, total) };
        }
        if p0.is_null() {
            return None;
        }

        // SAFETY: `p0` is a fresh block of at least `total` bytes with at
        // least `offset >= header::HEADER_SIZE` bytes before the returned
        // user pointer.
        let user = unsafe {
            let user = p0.cast::<u8>().add(offset);
            header::stash_align(user, align)
        };
        Some(user)
    }

    unsafe fn dealloc(&self, ptr: *mut u8) {
        // SAFETY: `ptr` was produced by `alloc` above, so it carries a
        // valid stashed alignment.
        let align = unsafe { header::read_align(ptr) };
        let offset = header::padded_size(align);
        // SAFETY: `offset` bytes precede `ptr`, as arranged in `alloc`.
        let p0 = unsafe { ptr.sub(offset) };

        let state = self.state.lock();
        // SAFETY: `state.control.0` is the live control block, `p0` is the
        // exact pointer the engine returned for this allocation.
        unsafe { ffi::tlsf_free(state.control.0, p0.cast()) };
    }

    unsafe fn block_size(&self, ptr: *mut u8) -> usize {
        // SAFETY: `ptr` was produced by `alloc` above.
        let align = unsafe { header::read_align(ptr) };
        let offset = header::padded_size(align);
        // SAFETY: `offset` bytes precede `ptr`, as arranged in `alloc`.
        let p0 = unsafe { ptr.sub(offset) };
        // SAFETY: `p0` is a live block returned by the engine.
        let raw = unsafe { ffi::tlsf_block_size(p0.cast()) };
        raw.saturating_sub(offset)
    }

    unsafe fn realloc(&self, ptr: *mut u8, old_align: usize, new_size: usize) -> Option<*mut u8> {
        let old_align = old_align.max(DEFAULT_ALIGN);
        // SAFETY: `ptr` was produced by `alloc` above.
        let stashed_align = unsafe { header::read_align(ptr) };
        debug_assert_eq!(stashed_align, old_align);
        let offset = header::padded_size(old_align);
        let total = offset.checked_add(new_size)?;
        // SAFETY: `offset` bytes precede `ptr`, as arranged in `alloc`.
        let p0 = unsafe { ptr.sub(offset) };

        let mut state = self.state.lock();
        // SAFETY: `state.control.0` is the live control block, `p0` is the
        // exact engine pointer for this allocation.
        let mut new_p0 = unsafe { ffi::tlsf_realloc(state.control.0, p0.cast(), total) };
        if new_p0.is_null() && self.grow(&mut state, total) {
            // SAFETY: same as above, now with an additional pool to draw on.
            new_p0 = unsafe { ffi::tlsf_realloc(state.control.0, p0.cast(), total) };
        }
        if new_p0.is_null() {
            return None;
        }

        // SAFETY: `new_p0` is a live block of at least `total` bytes with
        // `offset` bytes of header room before the user pointer, since
        // `tlsf_realloc` preserves relative content and we requested the
        // same `offset` padding.
        let user = unsafe {
            let user = new_p0.cast::<u8>().add(offset);
            header::stash_align(user, old_align)
        };
        Some(user)
    }
}

/// Maps a fresh, zero-filled, anonymous, private region of `len` bytes.
fn map_pool(len: usize) -> Option<*mut c_void> {
    // SAFETY: all arguments are valid for an anonymous mapping; the
    // returned pointer is checked against `MAP_FAILED` before use.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        None
    } else {
        Some(ptr)
    }
}

/// Releases a mapping obtained from [`map_pool`]. Only called on the
/// failure path right after mapping, before it is registered as a live
/// pool — once a pool is registered we never unmap it, since the engine
/// may still reference it.
///
/// # Safety
/// `ptr`/`len` must be exactly the mapping returned by a prior `map_pool`.
unsafe fn unmap_pool(ptr: *mut c_void, len: usize) {
    // SAFETY: forwarded from caller's contract.
    unsafe {
        libc::munmap(ptr, len);
    }
}

// SAFETY: `TlsfBackEnd`'s only interior-mutable state is the
// `Mutex<TlsfState>`, which itself is `Sync` because `parking_lot::Mutex`
// requires `T: Send` (satisfied by our `RawPtr` impl) to be `Sync`.
unsafe impl Sync for TlsfBackEnd {}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_backend() -> Option<TlsfBackEnd> {
        TlsfBackEnd::new()
    }

    #[test]
    fn alloc_and_dealloc_roundtrip() {
        let Some(be) = new_backend() else {
            // No TLSF engine linked into the test binary; nothing to assert.
            return;
        };
        let ptr = be.alloc(128, 8).expect("alloc");
        assert_eq!(ptr as usize % 8, 0);
        // SAFETY: ptr has 128 live bytes.
        unsafe {
            std::ptr::write_bytes(ptr, 0x5A, 128);
            assert!(be.block_size(ptr) >= 128);
            be.dealloc(ptr);
        }
    }

    #[test]
    fn overaligned_alloc_respects_alignment() {
        let Some(be) = new_backend() else { return };
        let ptr = be.alloc(64, 4096).expect("alloc");
        assert_eq!(ptr as usize % 4096, 0);
        // SAFETY: ptr came from this back-end.
        unsafe { be.dealloc(ptr) };
    }

    #[test]
    fn realloc_preserves_prefix_content() {
        let Some(be) = new_backend() else { return };
        let ptr = be.alloc(32, 8).expect("alloc");
        // SAFETY: ptr has 32 live bytes.
        unsafe { std::ptr::write_bytes(ptr, 0x11, 32) };
        // SAFETY: ptr is live with alignment 8.
        let grown = unsafe { be.realloc(ptr, 8, 512) }.expect("realloc");
        // SAFETY: grown has at least 32 live bytes carried over.
        let slice = unsafe { std::slice::from_raw_parts(grown, 32) };
        assert_eq!(slice, &[0x11; 32]);
        // SAFETY: grown came from this back-end.
        unsafe { be.dealloc(grown) };
    }
}
