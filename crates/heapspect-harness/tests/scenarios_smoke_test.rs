//! Runs the harness binary against the host's own libc as a baseline.
//!
//! This does not exercise `heapspect` itself (that requires building the
//! `heapspect-abi` cdylib and invoking this binary with `LD_PRELOAD` set,
//! which is an integration concern for deployment rather than `cargo test`)
//! but it proves the scenario checks are well-formed and pass against a
//! conformant allocator.

use std::process::Command;

#[test]
fn scenarios_pass_against_host_libc() {
    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .arg("scenarios")
        .output()
        .expect("failed to run harness binary");
    assert!(
        output.status.success(),
        "harness scenarios failed:\n{}",
        String::from_utf8_lossy(&output.stdout)
    );
}

#[test]
fn concurrency_passes_against_host_libc() {
    let output = Command::new(env!("CARGO_BIN_EXE_harness"))
        .args(["concurrency", "--ops", "2000"])
        .output()
        .expect("failed to run harness binary");
    assert!(
        output.status.success(),
        "harness concurrency check failed:\n{}",
        String::from_utf8_lossy(&output.stdout)
    );
}
