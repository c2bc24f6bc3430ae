//! Aligned-block header scheme.
//!
//! `tlsf_memalign` hands back a pointer already aligned to the request, but
//! on `free`/`realloc` we only get that same user pointer back — we still
//! need the engine's own block base (which `tlsf_free`/`tlsf_realloc` take
//! directly, since the TLSF engine recovers its own bookkeeping from the
//! pointer it returned). The one extra thing we need to recover that the
//! engine does *not* track for us is the alignment the block was requested
//! with, since `realloc` has to re-request at least that alignment.
//!
//! We store it as a single `usize` immediately before the user pointer,
//! which `tlsf_memalign` always leaves room for as long as we pad the
//! requested size by one header word before calling it.

#![allow(unsafe_code)]

use std::mem::size_of;

/// Size of the header word stashed before every TLSF-backed pointer.
pub const HEADER_SIZE: usize = size_of::<usize>();

/// Computes the extra size to request from the engine so that a header
/// word fits before the user-visible, `align`-aligned pointer.
///
/// Padding by a full `align` (rather than just `HEADER_SIZE`) guarantees
/// the header word itself never crosses below the start of the
/// engine-owned block regardless of how the engine rounds its internal
/// alignment.
#[must_use]
pub const fn padded_size(requested_align: usize) -> usize {
    requested_align.max(HEADER_SIZE)
}

/// Writes `align` into the header word immediately preceding `user_ptr`
/// and returns `user_ptr` unchanged.
///
/// # Safety
/// `user_ptr` must have at least `HEADER_SIZE` bytes of writable padding
/// immediately before it, which holds as long as the engine was asked to
/// align to at least `padded_size(align)`.
pub unsafe fn stash_align(user_ptr: *mut u8, align: usize) -> *mut u8 {
    // SAFETY: caller guarantees `HEADER_SIZE` writable bytes precede `user_ptr`.
    unsafe {
        let header = user_ptr.sub(HEADER_SIZE).cast::<usize>();
        header.write_unaligned(align);
    }
    user_ptr
}

/// Reads back the alignment stashed by [`stash_align`] for `user_ptr`.
///
/// # Safety
/// `user_ptr` must have been produced by [`stash_align`].
pub unsafe fn read_align(user_ptr: *mut u8) -> usize {
    // SAFETY: caller guarantees `user_ptr` was produced by `stash_align`.
    unsafe {
        let header = user_ptr.sub(HEADER_SIZE).cast::<usize>();
        header.read_unaligned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_alignment_through_header() {
        let mut buf = [0u8; 64];
        // Pretend byte 32 is the user pointer, with HEADER_SIZE bytes of
        // padding before it.
        let user_ptr = unsafe { buf.as_mut_ptr().add(32) };
        unsafe {
            stash_align(user_ptr, 4096);
            assert_eq!(read_align(user_ptr), 4096);
        }
    }

    #[test]
    fn padded_size_never_smaller_than_header() {
        assert_eq!(padded_size(1), HEADER_SIZE);
        assert_eq!(padded_size(4096), 4096);
    }
}
