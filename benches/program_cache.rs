//! Benchmarks for program builds with and without memoization

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kerna_rs::prelude::*;

const TRIG: &str = "// trig lookup table\n\
                    __kernel void trigTable(__global const float* A,\n\
                                            __global const float* B,\n\
                                            __global float* C)\n\
                    {\n\
                        int i = get_global_id(0);\n\
                        C[2*i]   = cos(A[i]);\n\
                        C[2*i+1] = sin(B[i]);\n\
                    }\n";

fn bench_builds(c: &mut Criterion) {
    let config = Config::builder().interactive(false).build().unwrap();
    let catalog = DeviceCatalog::host(&config).unwrap();
    let devices = catalog.devices().to_vec();
    let context = Context::open(&catalog, &devices).unwrap();

    let uncached = ProgramCache::new(&Config::builder().cache_programs(false).build().unwrap());
    c.bench_function("build_uncached", |b| {
        b.iter(|| uncached.build(&context, black_box(TRIG), &[]).unwrap());
    });

    let cached = ProgramCache::new(&config);
    cached.build(&context, TRIG, &[]).unwrap();
    c.bench_function("build_cached", |b| {
        b.iter(|| cached.build(&context, black_box(TRIG), &[]).unwrap());
    });
}

fn bench_kernel_creation(c: &mut Criterion) {
    let config = Config::builder().interactive(false).build().unwrap();
    let catalog = DeviceCatalog::host(&config).unwrap();
    let devices = catalog.devices().to_vec();
    let context = Context::open(&catalog, &devices).unwrap();
    let program = ProgramCache::new(&config).build(&context, TRIG, &[]).unwrap();

    c.bench_function("create_kernel", |b| {
        b.iter(|| program.kernel(black_box("trigTable")).unwrap());
    });
}

criterion_group!(benches, bench_builds, bench_kernel_creation);
criterion_main!(benches);
