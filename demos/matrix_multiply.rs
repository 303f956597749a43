//! `C = A * B` for `N x N` double matrices (positional argument, default 20)
//! on a device that supports double precision. A = 2I and B is all 17.5,
//! so every element of C is 35.

mod common;

use common::{check, init_logging, prolog, read_kernel, DemoArgs};
use kerna_rs::prelude::*;
use std::io;

fn main() {
    let args = DemoArgs::from_env();
    init_logging(args.debug);
    let config = args.config();
    let n = args.number.unwrap_or(20);
    if n == 0 {
        eprintln!("matrix order must be positive");
        std::process::exit(1);
    }

    let mut a = vec![0f64; n * n];
    for i in 0..n {
        a[i * n + i] = 2.0;
    }
    let b = vec![17.5f64; n * n];
    let mut c = vec![0f64; n * n];

    let (catalog, platform) = prolog(&args, &config);
    let on_platform = check("clGetDeviceIDs-1", catalog.preferred_devices(&platform));

    println!("\nLooking for a device that supports double precision...");
    let candidates: Vec<Device> = on_platform
        .into_iter()
        .filter(|d| d.supports(Capability::DoublePrecision))
        .collect();
    let device = check(
        "selectDevice",
        DeviceSelector::new(&candidates)
            .requirement("double precision")
            .interactive(config.interactive)
            .select(io::stdin().lock(), &mut io::stdout()),
    );

    let context = check("clCreateContext", Context::open(&catalog, &[device.clone()]));
    let queue = check("clCreateCommandQueue", context.open_queue(&device));

    let d_a = check(
        "clCreateBuffer-A",
        Buffer::allocate_for::<f64>(&context, n * n, AccessMode::ReadOnly),
    );
    let d_b = check(
        "clCreateBuffer-B",
        Buffer::allocate_for::<f64>(&context, n * n, AccessMode::ReadOnly),
    );
    let d_c = check(
        "clCreateBuffer-C",
        Buffer::allocate_for::<f64>(&context, n * n, AccessMode::WriteOnly),
    );
    check("clEnqueueWriteBuffer-A", queue.upload(&d_a, &a, false));
    check("clEnqueueWriteBuffer-B", queue.upload(&d_b, &b, false));

    let source = read_kernel(&args.kernel_path("matrixMultiplyV1.cl"));
    let program = check(
        "clBuildProgram",
        ProgramCache::new(&config).build(&context, &source, &[device.clone()]),
    );
    let mut kernel = check("clCreateKernel", program.kernel("matrixMultiply"));
    check("clSetKernelArg-A", kernel.set_arg(0, &d_a));
    check("clSetKernelArg-B", kernel.set_arg(1, &d_b));
    check("clSetKernelArg-C", kernel.set_arg(2, &d_c));
    check("clSetKernelArg-N", kernel.set_arg(3, n as i32));

    let launched = check(
        "clEnqueueNDRangeKernel",
        queue.dispatch(&kernel, &WorkSize::two_d(n, n)),
    );
    check("clWaitForEvents", launched.wait());

    let pending = check("clEnqueueReadBuffer", queue.download_async::<f64>(&d_c));
    c.copy_from_slice(&check("clWaitForEvents", pending.wait()));

    let wrong = c.iter().filter(|&&v| v != 35.0).count();
    println!("\nC[0][0] = {}, C[{}][{}] = {}", c[0], n - 1, n - 1, c[n * n - 1]);
    println!("{} of {} elements differ from 35", wrong, n * n);

    context.close();
    if wrong != 0 {
        std::process::exit(1);
    }
}
