/// Runs `$reentrant` if the current thread is already inside a guarded
/// call, otherwise enters the guard and runs `$normal`.
///
/// Centralizes the one piece of control flow every entry point in
/// `malloc_abi` shares, so each function body only has to state its two
/// cases rather than re-deriving the guard dance.
macro_rules! guarded {
    (reentrant: $reentrant:expr, normal: $normal:expr $(,)?) => {{
        if crate::reentry::is_reentrant() {
            $reentrant
        } else {
            let _guard = crate::reentry::enter();
            $normal
        }
    }};
}

pub(crate) use guarded;
