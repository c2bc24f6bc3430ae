//! A bounded, fixed-capacity call-site table backed by its own `mmap`
//! region rather than the process's (interposed) global allocator.
//!
//! The diagnostic back-end's bookkeeping must never call `malloc` itself —
//! it *is* `malloc`. Using a `std::collections::HashMap` here would
//! allocate through whichever allocator is active, which is us, which
//! would only be saved from infinite recursion by the ABI layer's
//! reentrancy guard falling back to the original libc. Relying on that
//! fallback for routine bookkeeping would also silently corrupt this
//! table's own counts whenever it ran reentrantly. Self-owned memory
//! sidesteps the question entirely.

#![allow(unsafe_code)]

use crate::diagnostic::stacktrace::{CallSite, MAX_FRAMES};
use crate::original;
use parking_lot::Mutex;
use std::ptr::NonNull;

/// Hard cap on distinct call sites tracked. Beyond this, new sites are
/// silently dropped from reporting (existing sites keep accumulating) —
/// this bounds the arena's `mmap` footprint to a fixed, small size
/// regardless of how long the process runs.
pub const CAPACITY: usize = 4096;

#[derive(Clone, Copy)]
struct Entry {
    fingerprint: u64,
    occupied: bool,
    count: u64,
    bytes: u64,
    frames: [usize; MAX_FRAMES],
    depth: u8,
}

/// One reported call site: its captured frames and accumulated totals.
pub struct Report {
    pub frames: [usize; MAX_FRAMES],
    pub depth: u8,
    pub count: u64,
    pub bytes: u64,
}

/// Raw, self-owned backing storage for the table: `CAPACITY` [`Entry`]
/// slots obtained from the original libc `calloc` (resolved via
/// [`original::original_calloc`]), never from `Box`/`Vec`, so that
/// constructing or growing this table can never call back into an
/// installed allocator.
struct RawTable(NonNull<Entry>);

// SAFETY: access is always serialized by `DiagnosticArena`'s `Mutex`.
unsafe impl Send for RawTable {}

impl RawTable {
    fn new() -> Self {
        let calloc = original::original_calloc()
            .expect("libc calloc must be resolvable via dlsym(RTLD_NEXT)");
        // SAFETY: `calloc` is the resolved libc `calloc`, called with a
        // valid element count and size.
        let raw = unsafe { calloc(CAPACITY, std::mem::size_of::<Entry>()) };
        let ptr = NonNull::new(raw.cast::<Entry>())
            .expect("calloc of the diagnostic arena's fixed table must not fail");
        // calloc already zeroed the region, and an all-zero `Entry` has
        // `occupied == false`, so no further initialization is needed.
        Self(ptr)
    }

    fn as_slice(&self) -> &mut [Entry] {
        // SAFETY: `self.0` points to a `calloc`'d region of `CAPACITY`
        // contiguous `Entry`s, and all access goes through the owning
        // `Mutex`, so no aliasing `&mut` can coexist.
        unsafe { std::slice::from_raw_parts_mut(self.0.as_ptr(), CAPACITY) }
    }
}

impl Drop for RawTable {
    fn drop(&mut self) {
        if let Some(free) = original::original_free() {
            // SAFETY: `self.0` was allocated by the matching `calloc` above
            // and is never freed anywhere else.
            unsafe { free(self.0.as_ptr().cast()) };
        }
    }
}

/// Open-addressing table over a fixed number of [`Entry`] slots, owned by
/// this struct (not by the global allocator) for its entire lifetime.
pub struct DiagnosticArena {
    table: Mutex<RawTable>,
    dropped_sites: std::sync::atomic::AtomicU64,
}

impl DiagnosticArena {
    /// Allocates the table's backing storage directly via the original
    /// libc `calloc`, bypassing any installed allocator (including our
    /// own) entirely.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Mutex::new(RawTable::new()),
            dropped_sites: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Records one allocation of `size` bytes at `site`, creating a new
    /// table entry if this fingerprint hasn't been seen and there is room,
    /// or bumping the existing entry's counters otherwise.
    pub fn record(&self, site: &CallSite, size: u64) {
        let fp = site.fingerprint();
        let table = self.table.lock();
        let slots = table.as_slice();
        let start = (fp as usize) % CAPACITY;

        for probe in 0..CAPACITY {
            let idx = (start + probe) % CAPACITY;
            let slot = &mut slots[idx];
            if slot.occupied && slot.fingerprint == fp {
                slot.count += 1;
                slot.bytes += size;
                return;
            }
            if !slot.occupied {
                let addrs = site.addresses();
                let mut frames = [0usize; MAX_FRAMES];
                frames[..addrs.len()].copy_from_slice(addrs);
                *slot = Entry {
                    fingerprint: fp,
                    occupied: true,
                    count: 1,
                    bytes: size,
                    frames,
                    depth: addrs.len() as u8,
                };
                return;
            }
        }

        self.dropped_sites
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    /// Number of distinct call sites that could not be recorded because
    /// the table was full.
    #[must_use]
    pub fn dropped_sites(&self) -> u64 {
        self.dropped_sites.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Snapshots every occupied entry for reporting. Called once, from the
    /// exit-time finalizer, so the O(CAPACITY) scan is not a hot-path cost.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Report> {
        let table = self.table.lock();
        table
            .as_slice()
            .iter()
            .filter(|e| e.occupied)
            .map(|e| Report {
                frames: e.frames,
                depth: e.depth,
                count: e.count,
                bytes: e.bytes,
            })
            .collect()
    }
}

impl Default for DiagnosticArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_accumulates_same_site() {
        let arena = DiagnosticArena::new();
        let site = CallSite::capture(0);
        arena.record(&site, 16);
        arena.record(&site, 32);
        let snapshot = arena.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].count, 2);
        assert_eq!(snapshot[0].bytes, 48);
    }

    #[test]
    fn distinct_sites_get_distinct_entries() {
        let arena = DiagnosticArena::new();
        fn site_a() -> CallSite {
            CallSite::capture(0)
        }
        fn site_b() -> CallSite {
            CallSite::capture(0)
        }
        arena.record(&site_a(), 8);
        arena.record(&site_b(), 8);
        assert_eq!(arena.snapshot().len(), 2);
    }
}
