//! Back-end allocation benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use heapspect_core::BackEnd;
use heapspect_core::passthrough::PassthroughBackEnd;

const DEFAULT_ALIGN: usize = 16;

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let back_end = PassthroughBackEnd::new();
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096, 32768];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("passthrough", size), &size, |b, &sz| {
            b.iter(|| {
                let ptr = back_end.alloc(sz, DEFAULT_ALIGN).expect("allocation failed");
                criterion::black_box(ptr);
                // SAFETY: ptr was just returned by this same back-end.
                unsafe { back_end.dealloc(ptr) };
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let back_end = PassthroughBackEnd::new();
    let mut group = c.benchmark_group("alloc_burst");

    group.bench_function("1000x64B_passthrough", |b| {
        b.iter(|| {
            let ptrs: Vec<*mut u8> = (0..1000)
                .map(|_| back_end.alloc(64, DEFAULT_ALIGN).expect("allocation failed"))
                .collect();
            for ptr in &ptrs {
                // SAFETY: each ptr was just allocated above by this back-end.
                unsafe { back_end.dealloc(*ptr) };
            }
            criterion::black_box(ptrs.len());
        });
    });

    group.finish();
}

fn bench_realloc_growth(c: &mut Criterion) {
    let back_end = PassthroughBackEnd::new();
    let mut group = c.benchmark_group("realloc_growth");

    group.bench_function("64B_to_4096B_passthrough", |b| {
        b.iter(|| {
            let ptr = back_end.alloc(64, DEFAULT_ALIGN).expect("allocation failed");
            // SAFETY: ptr was just allocated with DEFAULT_ALIGN above.
            let grown = unsafe { back_end.realloc(ptr, DEFAULT_ALIGN, 4096) }.expect("realloc failed");
            criterion::black_box(grown);
            // SAFETY: grown was just returned by this same back-end.
            unsafe { back_end.dealloc(grown) };
        });
    });

    group.finish();
}

criterion_group!(benches, bench_alloc_free_cycle, bench_alloc_burst, bench_realloc_growth);
criterion_main!(benches);
