//! Top-N report generation, run once at process exit.
//!
//! Unlike `record`, this path is allowed to allocate and symbolicate
//! freely — it runs from the library's exit-time finalizer, after the
//! process has stopped doing real work, so there's no reentrancy concern
//! and no latency budget to protect.

#![allow(unsafe_code)]

use super::arena::{DiagnosticArena, Report};
use std::io::Write;
use std::path::Path;

/// Returns the kernel thread ID of the calling thread.
fn current_tid() -> i32 {
    // SAFETY: `gettid` has no preconditions.
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// Writes two report files into `dir`: `top_alloc_bytes_bt.<pid>.<tid>.log`
/// and `top_num_calls_bt.<pid>.<tid>.log`, each listing the top `num_tops`
/// call sites by that metric with symbolicated frames. `<pid>` is this
/// process's id and `<tid>` is the kernel thread id of the caller (the
/// thread running the exit-time finalizer).
///
/// Always writes both files, even if zero allocations were ever recorded —
/// an empty report is still useful evidence that the process allocated
/// nothing (or that the diagnostic back-end never got invoked), and a
/// missing file would be indistinguishable from "report generation
/// crashed".
pub fn write_reports(arena: &DiagnosticArena, dir: &Path, num_tops: usize, show_recurrent_callers: bool) {
    let mut sites = arena.snapshot();
    if !show_recurrent_callers {
        sites.retain(|s| s.count > 1);
    }

    let pid = std::process::id();
    let tid = current_tid();

    let bytes_path = dir.join(format!("top_alloc_bytes_bt.{pid}.{tid}.log"));
    let count_path = dir.join(format!("top_num_calls_bt.{pid}.{tid}.log"));

    write_one(&bytes_path, &mut sites, num_tops, |s| s.bytes, "bytes");
    write_one(&count_path, &mut sites, num_tops, |s| s.count, "count");

    let dropped = arena.dropped_sites();
    if dropped > 0 {
        eprintln_raw(&format!(
            "heapspect: diagnostic arena full, {dropped} call site(s) were not tracked\n"
        ));
    }
}

fn write_one(path: &Path, sites: &mut [Report], num_tops: usize, key: impl Fn(&Report) -> u64, label: &str) {
    sites.sort_by_key(|s| std::cmp::Reverse(key(s)));

    let Ok(mut file) = std::fs::File::create(path) else {
        eprintln_raw(&format!(
            "heapspect: could not create report file {}\n",
            path.display()
        ));
        return;
    };

    let _ = writeln!(file, "# top {num_tops} call sites by total {label}");
    for site in sites.iter().take(num_tops) {
        let _ = writeln!(file, "Allocate {} bytes with {} calls:", site.bytes, site.count);
        for &addr in &site.frames[..site.depth as usize] {
            let symbol = symbolicate(addr);
            let _ = writeln!(file, "    {addr:#018x}  {symbol}");
        }
    }
}

fn symbolicate(addr: usize) -> String {
    let mut name = None;
    backtrace::resolve(addr as *mut std::ffi::c_void, |symbol| {
        if name.is_none() {
            name = symbol.name().map(|n| n.to_string());
        }
    });
    name.unwrap_or_else(|| "<unknown>".to_string())
}

/// Writes directly to stderr via `write(2)`, bypassing any buffered
/// stdio/logging machinery that might itself allocate.
fn eprintln_raw(message: &str) {
    // SAFETY: `message.as_ptr()`/`len()` describe a valid, live byte slice
    // for the duration of this call; fd 2 is always open.
    unsafe {
        libc::write(2, message.as_ptr().cast(), message.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::stacktrace::CallSite;

    fn report_file_names(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let pid = std::process::id();
        let tid = current_tid();
        (
            dir.join(format!("top_alloc_bytes_bt.{pid}.{tid}.log")),
            dir.join(format!("top_num_calls_bt.{pid}.{tid}.log")),
        )
    }

    #[test]
    fn writes_both_report_files_even_when_empty() {
        let arena = DiagnosticArena::new();
        let dir = std::env::temp_dir().join(format!(
            "heapspect-report-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        write_reports(&arena, &dir, 10, true);
        let (bytes_path, count_path) = report_file_names(&dir);
        assert!(bytes_path.exists());
        assert!(count_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn report_contains_recorded_site() {
        let arena = DiagnosticArena::new();
        let site = CallSite::capture(0);
        arena.record(&site, 4096);
        let dir = std::env::temp_dir().join(format!(
            "heapspect-report-test2-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        write_reports(&arena, &dir, 10, true);
        let (bytes_path, _) = report_file_names(&dir);
        let contents = std::fs::read_to_string(bytes_path).unwrap();
        assert!(contents.contains("Allocate 4096 bytes"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
