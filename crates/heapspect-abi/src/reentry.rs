//! Per-thread reentrancy guard (C2).
//!
//! Every public entry point enters through [`guard`] before touching the
//! selected back-end. If the back-end's own internals allocate (growing a
//! `Vec`, taking a lock that itself allocates, resolving a `dlsym` symbol
//! the first time), that allocation re-enters this same module on the same
//! thread; `guard` detects that and routes the reentrant call straight to
//! the resolved original libc symbol instead of back into the back-end,
//! breaking what would otherwise be unbounded recursion.

use std::cell::Cell;

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// RAII token: increments the thread-local depth counter on creation,
/// decrements it on drop. While held, [`is_reentrant`] reports `true` for
/// any further entry on this same thread.
pub struct GuardToken {
    _private: (),
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Enters the guard for the current call, returning a token that exits it
/// on drop. Always succeeds — depth has no upper bound other than actual
/// call-stack depth, since a legitimately deep reentrant chain (back-end
/// allocates, which reenters at depth 2, whose original-libc fallback
/// itself never reenters again) is self-limiting in practice.
#[must_use]
pub fn enter() -> GuardToken {
    DEPTH.with(|d| d.set(d.get() + 1));
    GuardToken { _private: () }
}

/// Whether the current thread is already inside a guarded call, i.e.
/// whether this is a reentrant (nested) invocation.
///
/// Callers check this *before* calling [`enter`] for the current call —
/// depth `1` at check time means "one call already in progress", so the
/// call about to be made would be the reentrant one.
#[must_use]
pub fn is_reentrant() -> bool {
    DEPTH.with(|d| d.get() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_thread_is_not_reentrant() {
        std::thread::spawn(|| {
            assert!(!is_reentrant());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn nested_enter_is_detected() {
        std::thread::spawn(|| {
            assert!(!is_reentrant());
            let _outer = enter();
            assert!(is_reentrant());
            {
                let _inner = enter();
                assert!(is_reentrant());
            }
            assert!(is_reentrant());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn depth_returns_to_zero_after_drop() {
        std::thread::spawn(|| {
            {
                let _g = enter();
            }
            assert!(!is_reentrant());
        })
        .join()
        .unwrap();
    }
}
