//! Exit-time finalizer wiring for the diagnostic back-end.
//!
//! The diagnostic back-end accumulates call-site statistics for the whole
//! process lifetime and only needs to act once, when the process is about
//! to exit. We register that with the C runtime's own `atexit(3)` rather
//! than pulling in a constructor-attribute crate: `atexit` is already
//! exactly the right primitive, and we only need one registration, done
//! once from [`crate::state::construct`].

#[cfg(feature = "diagnostic")]
pub fn register_exit_hook() {
    extern "C" fn on_exit() {
        let dir = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        crate::state::backend().write_report(&dir);
    }

    // SAFETY: `on_exit` is a valid `extern "C" fn()`, and `atexit` has no
    // other preconditions.
    unsafe {
        libc::atexit(on_exit);
    }
}
