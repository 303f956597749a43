//! Fills a table with `C[2i] = cos(A[i])`, `C[2i+1] = sin(B[i])` on the device
//! and counts how far it strays from the host's double precision results.

mod common;

use common::{check, init_logging, prolog, read_kernel, DemoArgs};
use kerna_rs::prelude::*;
use std::f32::consts::PI;

const NUM_ELEMENTS: usize = 16384;

fn main() {
    let args = DemoArgs::from_env();
    init_logging(args.debug);
    let config = args.config();

    let d_theta = PI / (NUM_ELEMENTS - 1) as f32;
    let mut a = vec![0f32; NUM_ELEMENTS];
    let mut b = vec![0f32; NUM_ELEMENTS];
    let mut theta = 0f32;
    for i in 0..NUM_ELEMENTS {
        a[i] = theta;
        b[i] = PI - theta;
        theta += d_theta;
    }

    let (catalog, platform) = prolog(&args, &config);
    let devices = check("clGetDeviceIDs", catalog.preferred_devices(&platform));
    let context = check("clCreateContext", Context::open(&catalog, &devices));
    let queue = check("clCreateCommandQueue", context.open_queue(&devices[0]));

    let buf_a = check(
        "clCreateBuffer-A",
        Buffer::allocate_for::<f32>(&context, NUM_ELEMENTS, AccessMode::ReadOnly),
    );
    let buf_b = check(
        "clCreateBuffer-B",
        Buffer::allocate_for::<f32>(&context, NUM_ELEMENTS, AccessMode::ReadOnly),
    );
    let buf_c = check(
        "clCreateBuffer-C",
        Buffer::allocate_for::<f32>(&context, 2 * NUM_ELEMENTS, AccessMode::WriteOnly),
    );

    check("clEnqueueWriteBuffer-A", queue.upload(&buf_a, &a, false));
    check("clEnqueueWriteBuffer-B", queue.upload(&buf_b, &b, false));

    let source = read_kernel(&args.kernel_path("SimpleOpenCL.cl"));
    let program = check(
        "clBuildProgram",
        ProgramCache::new(&config).build(&context, &source, &devices),
    );
    let mut kernel = check("clCreateKernel", program.kernel("trigTable"));
    check("clSetKernelArg-A", kernel.set_arg(0, &buf_a));
    check("clSetKernelArg-B", kernel.set_arg(1, &buf_b));
    check("clSetKernelArg-C", kernel.set_arg(2, &buf_c));

    let launched = check(
        "clEnqueueNDRangeKernel",
        queue.dispatch(&kernel, &WorkSize::one_d(NUM_ELEMENTS)),
    );
    check("clWaitForEvents", launched.wait());

    let mut c = vec![0f32; 2 * NUM_ELEMENTS];
    check("clEnqueueReadBuffer", queue.download(&buf_c, &mut c));

    let mut n_diffs = 0;
    let mut max_diff = 0f64;
    for i in 0..NUM_ELEMENTS {
        let pairs = [
            (c[2 * i], f64::from(a[i]).cos()),
            (c[2 * i + 1], f64::from(b[i]).sin()),
        ];
        for (device, host) in pairs {
            let diff = (f64::from(device) - host).abs();
            if diff != 0.0 {
                n_diffs += 1;
                max_diff = max_diff.max(diff);
            }
        }
    }

    println!(
        "There were {} elements for a total of {} possible differences.",
        NUM_ELEMENTS,
        2 * NUM_ELEMENTS
    );
    println!("There were {} differences, maxDiff = {}", n_diffs, max_diff);

    context.close();
}
