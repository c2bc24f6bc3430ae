//! CLI entrypoint for the heapspect scenario harness.
//!
//! This binary links against the platform's ordinary `malloc`/`free`/etc.
//! symbol names via the `libc` crate. When invoked with
//! `LD_PRELOAD=/path/to/libheapspect.so harness <subcommand>`, the dynamic
//! linker resolves those symbol names to the interposer instead of glibc,
//! so every check below exercises whichever back-end the preloaded library
//! was built with. Run it unprefixed to exercise the host's own libc as a
//! baseline.

use std::ffi::c_void;
use std::process::ExitCode;
use std::ptr;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "heapspect-harness")]
#[command(about = "Scenario and property harness for the heapspect allocator interposer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the concrete end-to-end scenarios S1-S6.
    Scenarios,
    /// Run the two-thread disjoint-allocation concurrency property.
    Concurrency {
        /// Operations performed per thread.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
    },
    /// Allocate a growing total to exercise TLSF pool growth.
    Growth {
        /// Total live bytes to reach across all allocations.
        #[arg(long, default_value_t = 10 * 1024 * 1024)]
        total_bytes: usize,
        /// Size of each individual allocation.
        #[arg(long, default_value_t = 64 * 1024)]
        chunk_bytes: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let ok = match cli.command {
        Command::Scenarios => run_scenarios(),
        Command::Concurrency { ops } => run_concurrency(ops),
        Command::Growth { total_bytes, chunk_bytes } => run_growth(total_bytes, chunk_bytes),
    };
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

macro_rules! check {
    ($label:expr, $cond:expr) => {{
        let passed = $cond;
        println!("[{}] {}", if passed { "PASS" } else { "FAIL" }, $label);
        passed
    }};
}

fn run_scenarios() -> bool {
    let mut all_ok = true;
    all_ok &= scenario_s1();
    all_ok &= scenario_s2();
    all_ok &= scenario_s3();
    all_ok &= scenario_s4();
    all_ok &= scenario_s5();
    all_ok &= scenario_s6();
    all_ok
}

fn scenario_s1() -> bool {
    unsafe {
        let p = libc::malloc(1);
        let non_null = check!("S1: malloc(1) non-null", !p.is_null());
        if p.is_null() {
            return false;
        }
        let usable = libc::malloc_usable_size(p);
        let size_ok = check!("S1: malloc_usable_size(p) >= 1", usable >= 1);
        ptr::write_bytes(p as *mut u8, b'A', 1);
        libc::free(p);
        non_null && size_ok
    }
}

fn scenario_s2() -> bool {
    unsafe {
        let mut p: *mut c_void = ptr::null_mut();
        let rc = libc::posix_memalign(&mut p, 4096, 1111);
        let rc_ok = check!("S2: posix_memalign returns 0", rc == 0);
        let align_ok = check!("S2: pointer is 4096-aligned", (p as usize) % 4096 == 0);
        let size_ok = check!(
            "S2: malloc_usable_size(p) >= 1111",
            libc::malloc_usable_size(p) >= 1111
        );
        libc::free(p);
        rc_ok && align_ok && size_ok
    }
}

fn scenario_s3() -> bool {
    unsafe {
        let q = libc::realloc(ptr::null_mut(), 0x20);
        let q_ok = check!("S3: realloc(null, 0x20) non-null", !q.is_null());
        let r = libc::realloc(q, 0);
        let r_ok = check!("S3: realloc(q, 0) returns null", r.is_null());
        q_ok && r_ok
    }
}

fn scenario_s4() -> bool {
    unsafe {
        let page = libc::sysconf(libc::_SC_PAGESIZE).max(4096) as usize;
        let count = 121usize;
        let p = libc::calloc(count, page);
        let non_null = check!("S4: calloc(121, pagesize) non-null", !p.is_null());
        if p.is_null() {
            return false;
        }
        let bytes = std::slice::from_raw_parts(p as *const u8, count * page);
        let all_zero = check!("S4: first 121*pagesize bytes are zero", bytes.iter().all(|&b| b == 0));
        libc::free(p);
        non_null && all_zero
    }
}

fn scenario_s5() -> bool {
    unsafe {
        let p = libc::memalign(24, 100);
        let non_null = check!("S5: memalign(24, 100) non-null", !p.is_null());
        if p.is_null() {
            return false;
        }
        let aligned = check!("S5: pointer is 32-aligned (rounded up from 24)", (p as usize) % 32 == 0);
        libc::free(p);
        non_null && aligned
    }
}

fn scenario_s6() -> bool {
    unsafe {
        *libc::__errno_location() = 0;
        let p = libc::aligned_alloc(24, 100);
        let null_ok = check!("S6: aligned_alloc(24, 100) returns null", p.is_null());
        let errno_ok = check!("S6: errno == EINVAL", *libc::__errno_location() == libc::EINVAL);
        null_ok && errno_ok
    }
}

fn run_concurrency(ops: usize) -> bool {
    use std::thread;

    let worker = move |tag: u8| {
        move || -> bool {
            let mut blocks: Vec<(*mut u8, usize)> = Vec::with_capacity(ops);
            for i in 0..ops {
                let size = 16 + (i % 200);
                // SAFETY: size is nonzero; pointer is freed below.
                let p = unsafe { libc::malloc(size) as *mut u8 };
                if p.is_null() {
                    return false;
                }
                // SAFETY: p is valid for `size` bytes, just allocated.
                unsafe {
                    ptr::write_bytes(p, tag, size);
                }
                blocks.push((p, size));
            }
            let mut ok = true;
            for (p, size) in &blocks {
                // SAFETY: p is valid for `size` bytes, written above.
                let slice = unsafe { std::slice::from_raw_parts(*p, *size) };
                if slice.iter().any(|&b| b != tag) {
                    ok = false;
                }
            }
            for (p, _) in blocks {
                // SAFETY: p was allocated by malloc above and not yet freed.
                unsafe {
                    libc::free(p as *mut c_void);
                }
            }
            ok
        }
    };

    let a = thread::spawn(worker(0xAA));
    let b = thread::spawn(worker(0xBB));
    let a_ok = a.join().unwrap_or(false);
    let b_ok = b.join().unwrap_or(false);
    check!("concurrency: disjoint allocations stay uncorrupted", a_ok && b_ok)
}

fn run_growth(total_bytes: usize, chunk_bytes: usize) -> bool {
    let mut blocks = Vec::new();
    let mut live = 0usize;
    while live < total_bytes {
        // SAFETY: chunk_bytes is nonzero; pointer is freed below.
        let p = unsafe { libc::malloc(chunk_bytes) };
        if p.is_null() {
            println!("[FAIL] growth: malloc failed after {live} live bytes");
            for p in blocks {
                unsafe { libc::free(p) };
            }
            return false;
        }
        blocks.push(p);
        live += chunk_bytes;
    }
    for p in blocks {
        // SAFETY: each pointer was allocated above and not yet freed.
        unsafe { libc::free(p) };
    }
    check!(
        "growth: reached target live bytes without allocation failure",
        live >= total_bytes
    )
}
