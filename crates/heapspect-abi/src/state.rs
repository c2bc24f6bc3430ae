//! Back-end selection and the process-wide singleton instance.
//!
//! Exactly one of the `passthrough`/`tlsf`/`diagnostic` Cargo features must
//! be enabled; `heapspect-abi` is monomorphized over that single
//! [`SelectedBackEnd`] type so the hot allocation path never pays for
//! dynamic dispatch. The orthogonal `trace` feature wraps whichever
//! back-end is selected with [`heapspect_core::tracing::TracingBackEnd`],
//! independent of that choice.

use crate::once_init::OnceInit;

#[cfg(all(feature = "passthrough", not(any(feature = "tlsf", feature = "diagnostic"))))]
type InnerBackEnd = heapspect_core::passthrough::PassthroughBackEnd;

#[cfg(all(feature = "tlsf", not(any(feature = "passthrough", feature = "diagnostic"))))]
type InnerBackEnd = heapspect_core::tlsf::TlsfBackEnd;

#[cfg(all(feature = "diagnostic", not(any(feature = "passthrough", feature = "tlsf"))))]
type InnerBackEnd = heapspect_core::diagnostic::DiagnosticBackEnd;

#[cfg(not(any(feature = "passthrough", feature = "tlsf", feature = "diagnostic")))]
compile_error!("exactly one of the `passthrough`, `tlsf`, `diagnostic` features must be enabled");

#[cfg(any(
    all(feature = "passthrough", feature = "tlsf"),
    all(feature = "passthrough", feature = "diagnostic"),
    all(feature = "tlsf", feature = "diagnostic"),
))]
compile_error!("only one of the `passthrough`, `tlsf`, `diagnostic` features may be enabled at a time");

#[cfg(not(feature = "trace"))]
pub type SelectedBackEnd = InnerBackEnd;

#[cfg(feature = "trace")]
pub type SelectedBackEnd = heapspect_core::tracing::TracingBackEnd<InnerBackEnd>;

fn construct_inner() -> InnerBackEnd {
    #[cfg(feature = "passthrough")]
    {
        heapspect_core::passthrough::PassthroughBackEnd::new()
    }
    #[cfg(feature = "tlsf")]
    {
        heapspect_core::tlsf::TlsfBackEnd::new()
            .expect("TLSF back-end failed to map its initial pool or initialize its control block")
    }
    #[cfg(feature = "diagnostic")]
    {
        crate::startup::register_exit_hook();
        heapspect_core::diagnostic::DiagnosticBackEnd::new()
    }
}

fn construct() -> SelectedBackEnd {
    #[cfg(not(feature = "trace"))]
    {
        construct_inner()
    }
    #[cfg(feature = "trace")]
    {
        heapspect_core::tracing::TracingBackEnd::new(construct_inner())
    }
}

static BACKEND: OnceInit<SelectedBackEnd> = OnceInit::new();

/// Returns the process-wide back-end instance, constructing it on first
/// call. Every call after the first, on every thread, returns the same
/// reference; see [`OnceInit`] for the blocking semantics under
/// concurrent first use.
pub fn backend() -> &'static SelectedBackEnd {
    BACKEND.get_or_init(construct)
}
