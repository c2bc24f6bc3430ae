//! Environment-variable configuration, read once per process and cached.
//!
//! Every knob here is read through [`std::env::var`], which can itself
//! allocate (to build the `String`). Because that read can happen from
//! inside the reentrancy guard during back-end initialization, we cache with
//! a non-blocking atomic tri-state (unresolved/resolving/resolved) rather
//! than [`std::sync::OnceLock`]: `OnceLock::get_or_init` takes a futex-backed
//! lock that a reentrant call on the *same* thread would deadlock against,
//! and under `LD_PRELOAD` the only caller of these getters is the back-end's
//! own one-time init path, which already runs under the once-initializer's
//! mutex (see `heapspect-abi::once_init`) — so a cheap spin-free cache here
//! is sufficient and avoids a second lock layer.

use std::sync::atomic::{AtomicU64, Ordering};

const UNRESOLVED: u64 = u64::MAX;
const RESOLVING: u64 = u64::MAX - 1;

/// A process-wide cached `usize`-valued environment variable.
struct CachedSize {
    cell: AtomicU64,
    var: &'static str,
    default: u64,
}

impl CachedSize {
    const fn new(var: &'static str, default: u64) -> Self {
        Self {
            cell: AtomicU64::new(UNRESOLVED),
            var,
            default,
        }
    }

    fn get(&self) -> usize {
        let cached = self.cell.load(Ordering::Acquire);
        if cached != UNRESOLVED && cached != RESOLVING {
            return cached as usize;
        }
        if cached == RESOLVING {
            return self.default as usize;
        }

        if self
            .cell
            .compare_exchange(UNRESOLVED, RESOLVING, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            let v = self.cell.load(Ordering::Acquire);
            return if v != UNRESOLVED && v != RESOLVING {
                v as usize
            } else {
                self.default as usize
            };
        }

        let resolved = std::env::var(self.var)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(self.default);
        self.cell.store(resolved, Ordering::Release);
        resolved as usize
    }
}

static INITIAL_MEMPOOL_SIZE: CachedSize = CachedSize::new("INITIAL_MEMPOOL_SIZE", 100_000_000);
static ADDITIONAL_MEMPOOL_SIZE: CachedSize = CachedSize::new("ADDITIONAL_MEMPOOL_SIZE", 100_000_000);
static INITIAL_SBRK_SIZE: CachedSize = CachedSize::new("INITIAL_SBRK_SIZE", 1_000_000_000);
static MMAP_THRESHOLD: CachedSize = CachedSize::new("MMAP_THRESHOLD", 100_000_000);
static NUM_TOPS: CachedSize = CachedSize::new("NUM_TOPS", 10);

/// First TLSF pool mapping size in bytes (`INITIAL_MEMPOOL_SIZE`).
#[must_use]
pub fn initial_mempool_size() -> usize {
    INITIAL_MEMPOOL_SIZE.get()
}

/// Base size for TLSF growth mappings (`ADDITIONAL_MEMPOOL_SIZE`).
#[must_use]
pub fn additional_mempool_size() -> usize {
    ADDITIONAL_MEMPOOL_SIZE.get()
}

/// Pass-through back-end program-break pre-reservation size (`INITIAL_SBRK_SIZE`).
#[must_use]
pub fn initial_sbrk_size() -> usize {
    INITIAL_SBRK_SIZE.get()
}

/// Pass-through back-end `mallopt(M_MMAP_THRESHOLD)` value (`MMAP_THRESHOLD`).
#[must_use]
pub fn mmap_threshold() -> usize {
    MMAP_THRESHOLD.get()
}

/// Diagnostic back-end top-N report size (`NUM_TOPS`).
#[must_use]
pub fn num_tops() -> usize {
    NUM_TOPS.get()
}

/// Whether the diagnostic back-end includes call sites with a single
/// recorded call (`SHOW_RECURRENT_CALLERS=1`).
///
/// Cached the same way as the numeric knobs, but as a plain bool packed
/// into the same unresolved/resolving/resolved tri-state.
#[must_use]
pub fn show_recurrent_callers() -> bool {
    static CELL: AtomicU64 = AtomicU64::new(UNRESOLVED);
    let cached = CELL.load(Ordering::Acquire);
    if cached != UNRESOLVED && cached != RESOLVING {
        return cached != 0;
    }
    if cached == RESOLVING {
        return false;
    }
    if CELL
        .compare_exchange(UNRESOLVED, RESOLVING, Ordering::SeqCst, Ordering::Relaxed)
        .is_err()
    {
        let v = CELL.load(Ordering::Acquire);
        return v != UNRESOLVED && v != RESOLVING && v != 0;
    }
    let enabled = matches!(std::env::var("SHOW_RECURRENT_CALLERS"), Ok(v) if v == "1");
    CELL.store(u64::from(enabled), Ordering::Release);
    enabled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_size_parses_valid_value() {
        let cached = CachedSize::new("HEAPSPECT_TEST_NONEXISTENT_VAR_XYZ", 42);
        assert_eq!(cached.get(), 42);
        assert_eq!(cached.get(), 42);
    }

    #[test]
    fn cached_size_falls_back_on_resolving() {
        let cached = CachedSize::new("HEAPSPECT_TEST_VAR2", 7);
        cached.cell.store(RESOLVING, Ordering::SeqCst);
        assert_eq!(cached.get(), 7);
    }

    #[test]
    fn defaults_match_spec() {
        // unsafe to rely on real env here; just check defaults are sane and
        // exposed via the public getters when the vars are unset.
        assert_eq!(
            CachedSize::new("HEAPSPECT_TEST_UNUSED_A", 100_000_000).get(),
            100_000_000
        );
        assert_eq!(CachedSize::new("HEAPSPECT_TEST_UNUSED_B", 10).get(), 10);
    }
}
