//! Error number definitions and access, per `<errno.h>`.
//!
//! The interposer never keeps its own errno storage — glibc's `errno` is
//! already thread-local, and `malloc_abi` entry points run in the caller's
//! thread, so we write through libc's own errno cell via
//! [`libc::__errno_location`]. This keeps `errno` consistent for any mixed
//! call sequence of intercepted and non-intercepted libc functions.

#![allow(unsafe_code)]

/// Argument invalid (POSIX `EINVAL`).
pub const EINVAL: i32 = libc::EINVAL;
/// Not enough memory (POSIX `ENOMEM`).
pub const ENOMEM: i32 = libc::ENOMEM;

/// Returns the current thread's errno value.
#[must_use]
pub fn get_errno() -> i32 {
    // SAFETY: `__errno_location` always returns a valid, thread-local pointer.
    unsafe { *libc::__errno_location() }
}

/// Sets the current thread's errno value.
pub fn set_errno(value: i32) {
    // SAFETY: `__errno_location` always returns a valid, thread-local pointer.
    unsafe { *libc::__errno_location() = value };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_thread_local_cell() {
        set_errno(EINVAL);
        assert_eq!(get_errno(), EINVAL);
        set_errno(ENOMEM);
        assert_eq!(get_errno(), ENOMEM);
        set_errno(0);
        assert_eq!(get_errno(), 0);
    }
}
