//! Per-call CSV timing instrumentation, independent of which [`BackEnd`] is
//! selected.
//!
//! [`TracingBackEnd`] wraps any back-end and times every call with
//! [`std::time::Instant`], writing one CSV line per call to `./<pid>.log`:
//! `<op>, <args...>, <result>, <nanoseconds>`. This is a decorator, not a
//! back-end choice of its own — it composes with whichever of passthrough,
//! TLSF, or diagnostic is selected, the same way the instrumentation it is
//! grounded on wraps every `GlobalAllocator` subclass uniformly rather than
//! being a subclass itself.

#![allow(unsafe_code)]

use crate::backend::BackEnd;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt::Write as _;
use std::time::Instant;

const MAX_LOG_LINE_LEN: usize = 0x400;

thread_local! {
    static LOG_LINE_BUF: RefCell<String> = RefCell::new(String::with_capacity(MAX_LOG_LINE_LEN));
}

/// Opens `./<pid>.log` once per process and serializes writes to it behind a
/// mutex, mirroring the single mutex the original tracer takes around its
/// own `write(2)` call (the per-call formatting itself needs no lock since
/// each thread has its own line buffer).
struct TraceLog {
    fd: i32,
}

impl TraceLog {
    fn open() -> Self {
        let path = format!("./{}.log", std::process::id());
        // SAFETY: `path` is a valid NUL-terminated-by-CString byte sequence
        // once converted below; `open` has no other preconditions.
        let c_path = std::ffi::CString::new(path).expect("pid-based path never contains a NUL");
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 0o666) };
        if fd == -1 {
            let message = b"\n[ heapspect ] ERROR: failed to open trace log file.\n";
            // SAFETY: `message` is a valid byte slice for the duration of
            // this call, fd 2 is always open.
            unsafe {
                libc::write(2, message.as_ptr().cast(), message.len());
            }
            std::process::exit(1);
        }
        Self { fd }
    }

    fn write_line(&self, line: &str) {
        // SAFETY: `line.as_ptr()`/`len()` describe a valid, live byte slice
        // for the duration of this call, and `self.fd` is a valid, open fd.
        unsafe {
            libc::write(self.fd, line.as_ptr().cast(), line.len());
        }
    }
}

fn trace_log() -> &'static Mutex<TraceLog> {
    static LOG: std::sync::OnceLock<Mutex<TraceLog>> = std::sync::OnceLock::new();
    LOG.get_or_init(|| Mutex::new(TraceLog::open()))
}

fn write_csv_line(build: impl FnOnce(&mut String)) {
    LOG_LINE_BUF.with(|cell| {
        let mut buf = cell.borrow_mut();
        buf.clear();
        build(&mut buf);
        buf.push('\n');
        trace_log().lock().write_line(&buf);
    });
}

fn fmt_ptr(p: *mut u8) -> String {
    format!("{:#x}", p as usize)
}

fn fmt_opt_ptr(p: Option<*mut u8>) -> String {
    match p {
        Some(p) => fmt_ptr(p),
        None => "0x0".to_string(),
    }
}

/// Wraps `B` with per-call CSV timing, grounded on the original tracer's
/// `AllocInfo`/`DeallocInfo`/`GetBlockSizeInfo`/`AllocZeroedInfo`/
/// `ReallocInfo` records.
pub struct TracingBackEnd<B> {
    inner: B,
}

impl<B: BackEnd> TracingBackEnd<B> {
    #[must_use]
    pub fn new(inner: B) -> Self {
        // Force the log file open (and any fatal diagnostic) at construction
        // rather than lazily on the first traced call.
        let _ = trace_log();
        Self { inner }
    }
}

impl<B: BackEnd> BackEnd for TracingBackEnd<B> {
    fn alloc(&self, size: usize, align: usize) -> Option<*mut u8> {
        let start = Instant::now();
        let retval = self.inner.alloc(size, align);
        let nanos = start.elapsed().as_nanos();
        write_csv_line(|buf| {
            let _ = write!(buf, "alloc, {size}, {align}, {}, {nanos}", fmt_opt_ptr(retval));
        });
        retval
    }

    unsafe fn dealloc(&self, ptr: *mut u8) {
        let start = Instant::now();
        // SAFETY: forwarded from this method's own caller contract.
        unsafe { self.inner.dealloc(ptr) };
        let nanos = start.elapsed().as_nanos();
        write_csv_line(|buf| {
            let _ = write!(buf, "dealloc, {}, {nanos}", fmt_ptr(ptr));
        });
    }

    unsafe fn block_size(&self, ptr: *mut u8) -> usize {
        let start = Instant::now();
        // SAFETY: forwarded from this method's own caller contract.
        let retval = unsafe { self.inner.block_size(ptr) };
        let nanos = start.elapsed().as_nanos();
        write_csv_line(|buf| {
            let _ = write!(buf, "get_block_size, {}, {retval}, {nanos}", fmt_ptr(ptr));
        });
        retval
    }

    fn alloc_zeroed(&self, size: usize, align: usize) -> Option<*mut u8> {
        let start = Instant::now();
        let retval = self.inner.alloc_zeroed(size, align);
        let nanos = start.elapsed().as_nanos();
        write_csv_line(|buf| {
            let _ = write!(buf, "alloc_zeroed, {size}, {}, {nanos}", fmt_opt_ptr(retval));
        });
        retval
    }

    unsafe fn realloc(&self, ptr: *mut u8, old_align: usize, new_size: usize) -> Option<*mut u8> {
        let start = Instant::now();
        // SAFETY: forwarded from this method's own caller contract.
        let retval = unsafe { self.inner.realloc(ptr, old_align, new_size) };
        let nanos = start.elapsed().as_nanos();
        write_csv_line(|buf| {
            let _ = write!(
                buf,
                "realloc, {}, {new_size}, {}, {nanos}",
                fmt_ptr(ptr),
                fmt_opt_ptr(retval)
            );
        });
        retval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackEnd {
        allocs: AtomicUsize,
    }

    impl BackEnd for CountingBackEnd {
        fn alloc(&self, size: usize, _align: usize) -> Option<*mut u8> {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            let layout = std::alloc::Layout::from_size_align(size.max(1), 8).ok()?;
            // SAFETY: layout has non-zero size.
            let ptr = unsafe { std::alloc::alloc(layout) };
            if ptr.is_null() {
                None
            } else {
                Some(ptr)
            }
        }

        unsafe fn dealloc(&self, ptr: *mut u8) {
            let layout = std::alloc::Layout::from_size_align(1, 8).unwrap();
            // SAFETY: test-only, mirrors heapspect_core::backend's own test helper.
            unsafe { std::alloc::dealloc(ptr, layout) };
        }

        unsafe fn block_size(&self, _ptr: *mut u8) -> usize {
            1
        }
    }

    #[test]
    fn forwards_to_inner_and_returns_its_result() {
        let traced = TracingBackEnd::new(CountingBackEnd { allocs: AtomicUsize::new(0) });
        let ptr = traced.alloc(64, 8).expect("alloc");
        assert_eq!(traced.inner.allocs.load(Ordering::SeqCst), 1);
        // SAFETY: ptr is live with 64 bytes from this back-end.
        unsafe { traced.dealloc(ptr) };
    }
}
