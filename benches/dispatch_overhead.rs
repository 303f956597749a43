//! Benchmarks for enqueue-to-completion cost on the host platform

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kerna_rs::prelude::*;

const SAXPY: &str = "__kernel void saxpy(const float a, __global const float* X,\n\
                     __global const float* Y, const int n, __global float* Z) { }";

struct Bench {
    _catalog: DeviceCatalog,
    context: Context,
    queue: Queue,
}

fn setup(filter: DeviceFilter) -> Bench {
    let config = Config::builder().interactive(false).build().unwrap();
    let catalog = DeviceCatalog::host(&config).unwrap();
    let platform = catalog.platforms()[0].clone();
    let device = catalog.list_devices(&platform, filter).unwrap().remove(0);
    let context = Context::open(&catalog, &[device.clone()]).unwrap();
    let queue = context.open_queue(&device).unwrap();
    Bench {
        _catalog: catalog,
        context,
        queue,
    }
}

fn bench_saxpy_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("saxpy_dispatch");

    for filter in [DeviceFilter::Cpu, DeviceFilter::Gpu] {
        let bench = setup(filter);
        let program = ProgramCache::default()
            .build(&bench.context, SAXPY, &[])
            .unwrap();

        for size in [1_024usize, 65_536, 1_048_576].iter() {
            let n = *size;
            let x = Buffer::allocate_for::<f32>(&bench.context, n, AccessMode::ReadOnly).unwrap();
            let y = Buffer::allocate_for::<f32>(&bench.context, n, AccessMode::ReadOnly).unwrap();
            let z = Buffer::allocate_for::<f32>(&bench.context, n, AccessMode::WriteOnly).unwrap();
            bench.queue.upload(&x, &vec![1000.0f32; n], false).unwrap();
            bench.queue.upload(&y, &vec![10.0f32; n], true).unwrap();

            let mut kernel = program.kernel("saxpy").unwrap();
            kernel.set_arg(0, 2.0f32).unwrap();
            kernel.set_arg(1, &x).unwrap();
            kernel.set_arg(2, &y).unwrap();
            kernel.set_arg(3, n as i32).unwrap();
            kernel.set_arg(4, &z).unwrap();
            let work = WorkSize::one_d(n);

            group.bench_with_input(BenchmarkId::new(filter.to_string(), n), &n, |b, _| {
                b.iter(|| {
                    bench
                        .queue
                        .dispatch(black_box(&kernel), &work)
                        .unwrap()
                        .wait()
                        .unwrap()
                });
            });
        }
    }

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let bench = setup(DeviceFilter::Cpu);
    let n = 65_536;
    let data = vec![1.5f32; n];
    let buffer = Buffer::allocate_for::<f32>(&bench.context, n, AccessMode::ReadWrite).unwrap();
    let mut out = vec![0f32; n];

    c.bench_function("upload_download_64k", |b| {
        b.iter(|| {
            bench.queue.upload(&buffer, black_box(&data), false).unwrap();
            bench.queue.download(&buffer, &mut out).unwrap();
        });
    });
}

criterion_group!(benches, bench_saxpy_dispatch, bench_round_trip);
criterion_main!(benches);
