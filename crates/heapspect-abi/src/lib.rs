// Every `extern "C"` export in this crate accepts raw pointers from C
// callers per the documented POSIX/glibc contract; per-function safety
// docs restate that contract where it isn't the obvious default.
#![allow(clippy::missing_safety_doc)]
//! # heapspect-abi
//!
//! ABI-compatible `extern "C"` boundary for the `heapspect` allocator
//! interposer. This crate produces a `cdylib` (`libheapspect.so`) meant to
//! be loaded via `LD_PRELOAD`, overriding the process's `malloc` family
//! with one of three pluggable back-ends (see [`heapspect_core`]).
//!
//! # Architecture
//!
//! ```text
//! libc caller -> extern "C" entry (this crate) -> reentrancy guard -> BackEnd -> return
//! ```
//!
//! Exactly one of `heapspect-abi`'s `passthrough`/`tlsf`/`diagnostic`
//! Cargo features selects the back-end at build time (see [`state`]); the
//! ABI entry points in [`malloc_abi`] are generic over none of it — they
//! call straight into the single monomorphized [`state::SelectedBackEnd`].
//!
//! `#[no_mangle]` exports are only emitted in release builds
//! (`cfg_attr(not(debug_assertions), unsafe(no_mangle))`), so `cargo test`
//! in its default debug profile never shadows the test harness's own
//! allocator with this crate's symbols.

mod macros;
mod once_init;
mod reentry;
pub mod state;
mod startup;

pub mod malloc_abi;
pub mod passthrough_wrappers;
