//! The [`BackEnd`] trait: the single seam every allocation strategy plugs
//! into.
//!
//! `heapspect-abi` is monomorphized over exactly one implementor at build
//! time (selected by Cargo feature, see that crate's `lib.rs`), so there is
//! no dynamic dispatch on the hot allocation path.

#![allow(unsafe_code)]

/// A pluggable allocation strategy.
///
/// Implementors do not need to be reentrant with respect to *themselves* —
/// the ABI layer's reentrancy guard ensures a `BackEnd` method is never
/// called recursively on the thread that is already inside one. An
/// implementor's internal allocations (e.g. growing a free list) must
/// instead go through [`crate::original`] so they bypass the interposer
/// entirely rather than looping back into it.
pub trait BackEnd {
    /// Allocates at least `size` bytes aligned to `align`, which is always
    /// a power of two. Returns `None` on failure (the caller maps this to
    /// `NULL` and `ENOMEM`).
    ///
    /// `size == 0` is a valid request; implementations may return a
    /// unique non-null "empty" pointer that is safe to pass to `dealloc`.
    fn alloc(&self, size: usize, align: usize) -> Option<*mut u8>;

    /// Releases a pointer previously returned by `alloc`, `alloc_zeroed`,
    /// or `realloc` on this same back-end. `ptr` is never null — callers
    /// filter that out before reaching the `BackEnd`.
    ///
    /// # Safety
    /// `ptr` must be live and must have originated from this back-end.
    unsafe fn dealloc(&self, ptr: *mut u8);

    /// Returns the usable size of the block `ptr` points to, i.e. the
    /// largest `n` such that writing `n` bytes starting at `ptr` is sound.
    /// This is always at least the size requested at allocation time.
    ///
    /// # Safety
    /// `ptr` must be live and must have originated from this back-end.
    unsafe fn block_size(&self, ptr: *mut u8) -> usize;

    /// Allocates a zero-initialized block. The default forwards to
    /// [`alloc`](BackEnd::alloc) and zeroes the result; back-ends that can
    /// get zeroed memory for free (e.g. straight from `mmap`) should
    /// override this.
    fn alloc_zeroed(&self, size: usize, align: usize) -> Option<*mut u8> {
        let ptr = self.alloc(size, align)?;
        // SAFETY: `alloc` just returned `ptr` as a fresh, live block of at
        // least `size` bytes owned by this back-end.
        unsafe {
            std::ptr::write_bytes(ptr, 0, size);
        }
        Some(ptr)
    }

    /// Resizes the block at `ptr` to `new_size`, preserving the lesser of
    /// the old and new sizes worth of content. The default is a
    /// copy-and-free fallback; back-ends able to grow or shrink in place
    /// should override this for efficiency.
    ///
    /// # Safety
    /// `ptr` must be live and must have originated from this back-end, and
    /// `old_align` must be the alignment it was allocated with.
    unsafe fn realloc(&self, ptr: *mut u8, old_align: usize, new_size: usize) -> Option<*mut u8> {
        // SAFETY: forwarded from this method's own caller contract.
        unsafe { default_realloc(self, ptr, old_align, new_size) }
    }
}

/// Copy-and-free `realloc` fallback shared by [`BackEnd::realloc`]'s default
/// body and by back-ends (like [`crate::passthrough::PassthroughBackEnd`])
/// that only need it for a subset of requests.
///
/// # Safety
/// `ptr` must be live and must have originated from `back_end`, and
/// `old_align` must be the alignment it was allocated with.
pub(crate) unsafe fn default_realloc<B: BackEnd + ?Sized>(
    back_end: &B,
    ptr: *mut u8,
    old_align: usize,
    new_size: usize,
) -> Option<*mut u8> {
    // SAFETY: forwarded from caller's contract.
    let old_size = unsafe { back_end.block_size(ptr) };
    let new_ptr = back_end.alloc(new_size, old_align)?;
    let copy_len = old_size.min(new_size);
    // SAFETY: `ptr` has at least `old_size` live bytes, `new_ptr` has at
    // least `new_size` bytes just allocated, and `copy_len` is the smaller
    // of the two; the regions are disjoint since `new_ptr` is a fresh
    // allocation.
    unsafe {
        std::ptr::copy_nonoverlapping(ptr, new_ptr, copy_len);
        back_end.dealloc(ptr);
    }
    Some(new_ptr)
}
