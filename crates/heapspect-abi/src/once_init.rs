//! Process-wide once-initializer (C5).
//!
//! Exactly one thread runs the supplied initializer; every other thread
//! that calls [`OnceInit::get_or_init`] while that's in progress blocks on
//! a condition variable until it finishes, rather than racing ahead with a
//! half-constructed back-end or spinning. We use
//! [`parking_lot::Mutex`]/[`parking_lot::Condvar`] rather than
//! [`std::sync::OnceLock`] so the blocking behavior is explicit and
//! uncontended initialization stays on the Mutex's uncontended fast path.

use parking_lot::{Condvar, Mutex};

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Uninit,
    Initializing,
    Ready,
}

/// A value that is lazily constructed exactly once, with other callers
/// blocking (not spinning, not racing) until construction completes.
pub struct OnceInit<T> {
    state: Mutex<State>,
    ready: Condvar,
    value: std::cell::UnsafeCell<Option<T>>,
}

// SAFETY: `value` is only written once, by the single thread that wins the
// `Uninit -> Initializing` transition, and only read after `state` has
// been observed as `Ready` by any thread (including the writer), which is
// synchronized by the `Mutex`/`Condvar` pair above.
unsafe impl<T: Send> Sync for OnceInit<T> {}

impl<T> OnceInit<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State::Uninit),
            ready: Condvar::new(),
            value: std::cell::UnsafeCell::new(None),
        }
    }

    /// Returns a reference to the lazily-constructed value, running `init`
    /// on exactly one caller if this is the first call.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        let mut guard = self.state.lock();
        loop {
            match *guard {
                State::Ready => break,
                State::Uninit => {
                    *guard = State::Initializing;
                    drop(guard);
                    let value = init();
                    // SAFETY: only the thread that just transitioned
                    // `Uninit -> Initializing` reaches here, and no reader
                    // observes `Ready` until after this write completes
                    // (see the `state.lock()` re-acquire below).
                    unsafe { *self.value.get() = Some(value) };
                    guard = self.state.lock();
                    *guard = State::Ready;
                    self.ready.notify_all();
                    break;
                }
                State::Initializing => {
                    self.ready.wait(&mut guard);
                }
            }
        }
        drop(guard);
        // SAFETY: `state == Ready` was just observed under the lock, which
        // happens-after the writer's store into `value`.
        unsafe { (*self.value.get()).as_ref().unwrap_unchecked() }
    }
}

impl<T> Default for OnceInit<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn initializer_runs_exactly_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let once: Arc<OnceInit<u32>> = Arc::new(OnceInit::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let once = Arc::clone(&once);
                std::thread::spawn(move || {
                    *once.get_or_init(|| {
                        CALLS.fetch_add(1, Ordering::SeqCst);
                        42
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blocked_waiters_see_fully_initialized_value() {
        let once: Arc<OnceInit<Vec<u32>>> = Arc::new(OnceInit::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let once = Arc::clone(&once);
                std::thread::spawn(move || once.get_or_init(|| vec![1, 2, 3]).clone())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![1, 2, 3]);
        }
    }
}
