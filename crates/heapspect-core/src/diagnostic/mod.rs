//! The diagnostic back-end: passthrough allocation behavior plus
//! call-stack accounting, reported as a top-N summary at process exit.

#![allow(unsafe_code)]

pub mod arena;
pub mod report;
pub mod stacktrace;

use crate::backend::BackEnd;
use crate::config;
use crate::passthrough::PassthroughBackEnd;
use arena::DiagnosticArena;
use stacktrace::CallSite;

/// Frames belonging to this crate's own ABI entry points and this
/// method's own call to `CallSite::capture`, hidden from recorded sites so
/// reports point at caller code rather than interposer internals.
const SKIP_FRAMES: usize = 2;

/// Forwards every request to [`PassthroughBackEnd`] while recording a
/// call-stack fingerprint and byte count per allocation.
pub struct DiagnosticBackEnd {
    inner: PassthroughBackEnd,
    arena: DiagnosticArena,
}

impl DiagnosticBackEnd {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: PassthroughBackEnd::new(),
            arena: DiagnosticArena::new(),
        }
    }

    /// Writes the exit-time top-N report into `dir` as
    /// `top_alloc_bytes_bt.<pid>.<tid>.log` and
    /// `top_num_calls_bt.<pid>.<tid>.log`, reading
    /// `NUM_TOPS`/`SHOW_RECURRENT_CALLERS` from configuration. Intended to
    /// be called exactly once, from the library's destructor.
    pub fn write_report(&self, dir: &std::path::Path) {
        report::write_reports(
            &self.arena,
            dir,
            config::num_tops(),
            config::show_recurrent_callers(),
        );
    }
}

impl Default for DiagnosticBackEnd {
    fn default() -> Self {
        Self::new()
    }
}

impl BackEnd for DiagnosticBackEnd {
    fn alloc(&self, size: usize, align: usize) -> Option<*mut u8> {
        let ptr = self.inner.alloc(size, align)?;
        let site = CallSite::capture(SKIP_FRAMES);
        self.arena.record(&site, size as u64);
        Some(ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8) {
        // SAFETY: forwarded from this method's own caller contract.
        unsafe { self.inner.dealloc(ptr) };
    }

    unsafe fn block_size(&self, ptr: *mut u8) -> usize {
        // SAFETY: forwarded from this method's own caller contract.
        unsafe { self.inner.block_size(ptr) }
    }

    fn alloc_zeroed(&self, size: usize, align: usize) -> Option<*mut u8> {
        let ptr = self.inner.alloc_zeroed(size, align)?;
        let site = CallSite::capture(SKIP_FRAMES);
        self.arena.record(&site, size as u64);
        Some(ptr)
    }

    unsafe fn realloc(&self, ptr: *mut u8, old_align: usize, new_size: usize) -> Option<*mut u8> {
        // SAFETY: forwarded from this method's own caller contract.
        let new_ptr = unsafe { self.inner.realloc(ptr, old_align, new_size) }?;
        let site = CallSite::capture(SKIP_FRAMES);
        self.arena.record(&site, new_size as u64);
        Some(new_ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_records_and_passes_through() {
        let be = DiagnosticBackEnd::new();
        let ptr = be.alloc(64, 8).expect("alloc");
        // SAFETY: ptr has 64 live bytes.
        unsafe {
            assert!(be.block_size(ptr) >= 64);
            be.dealloc(ptr);
        }
        assert_eq!(be.arena.snapshot().len(), 1);
    }
}
