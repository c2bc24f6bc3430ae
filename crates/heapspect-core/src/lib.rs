//! Safe-Rust back-end implementations for the `heapspect` allocator interposer.
//!
//! This crate never exports `extern "C"` symbols itself — that boundary lives
//! in `heapspect-abi`. Everything here is an ordinary Rust API that the ABI
//! crate drives from inside its reentrancy guard.
//!
//! # Architecture
//!
//! ```text
//! libc caller -> heapspect-abi entry -> BackEnd::{alloc,dealloc,...} -> region-owning state
//! ```
//!
//! Three back-ends implement [`BackEnd`]: [`passthrough::PassthroughBackEnd`]
//! forwards to the original libc symbols, [`tlsf::TlsfBackEnd`] services
//! requests from anonymous-mmap pool regions through an external TLSF engine,
//! and [`diagnostic::DiagnosticBackEnd`] wraps passthrough with call-site
//! accounting. [`tracing::TracingBackEnd`] is a fourth, orthogonal wrapper
//! that can sit in front of any of the three, adding per-call CSV timing.

pub mod backend;
pub mod config;
pub mod diagnostic;
pub mod errno;
pub mod original;
pub mod passthrough;
pub mod tlsf;
pub mod tracing;

pub use backend::BackEnd;
