//! Allocation-free call-stack capture and fingerprinting.
//!
//! Symbolicating a backtrace (turning addresses into function names) calls
//! into the platform's dynamic linker and allocates; doing that on every
//! intercepted `malloc` would be both slow and, worse, reentrant into our
//! own interposed allocator. So we only ever capture raw instruction
//! pointers here — symbolication happens once, at report time, when the
//! process is already exiting (see [`super::report`]).

#![allow(unsafe_code)]

use backtrace::Frame;

/// Maximum number of frames captured per call site. Deep stacks beyond
/// this are fingerprinted on their outermost `MAX_FRAMES` entries only,
/// which is enough to distinguish essentially all real call sites without
/// growing the fixed-size [`CallSite`] representation.
pub const MAX_FRAMES: usize = 12;

/// A fixed-size, allocation-free record of one call stack's raw addresses.
#[derive(Clone, Copy)]
pub struct CallSite {
    frames: [usize; MAX_FRAMES],
    depth: u8,
}

impl CallSite {
    /// Captures the current call stack, skipping `skip_frames` innermost
    /// frames (used to hide the interposer's own entry points from the
    /// recorded site).
    #[must_use]
    pub fn capture(skip_frames: usize) -> Self {
        let mut frames = [0usize; MAX_FRAMES];
        let mut depth = 0u8;
        let mut seen = 0usize;

        // SAFETY: `trace` only reads the current thread's unwind context
        // and invokes our callback with stack-local `Frame`s; it performs
        // no heap allocation on the unwinder's fast path.
        unsafe {
            backtrace::trace_unsynchronized(|frame: &Frame| {
                if seen < skip_frames {
                    seen += 1;
                    return true;
                }
                if (depth as usize) >= MAX_FRAMES {
                    return false;
                }
                frames[depth as usize] = frame.ip() as usize;
                depth += 1;
                true
            });
        }

        Self { frames, depth }
    }

    /// The raw addresses captured, innermost (closest to the allocation
    /// call) first.
    #[must_use]
    pub fn addresses(&self) -> &[usize] {
        &self.frames[..self.depth as usize]
    }

    /// A stable 64-bit fingerprint of this call site, used as the hash
    /// table key in [`super::arena::DiagnosticArena`].
    ///
    /// FNV-1a over the raw addresses: fast, allocation-free, and more than
    /// sufficient collision resistance for a bounded table of call sites
    /// within one process.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = FNV_OFFSET;
        for &addr in self.addresses() {
            for byte in addr.to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_call_site_produces_same_fingerprint() {
        fn here() -> CallSite {
            CallSite::capture(0)
        }
        let mut sites = Vec::new();
        for _ in 0..2 {
            sites.push(here());
        }
        assert_eq!(sites[0].fingerprint(), sites[1].fingerprint());
    }

    #[test]
    fn capture_never_exceeds_max_frames() {
        let site = CallSite::capture(0);
        assert!(site.addresses().len() <= MAX_FRAMES);
    }
}
