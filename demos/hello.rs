//! Launches `helloOpenCL` over a 64 x 32 x 32 range using 1, 2 or 3 of its
//! dimensions (the positional argument, default 1).

mod common;

use common::{check, init_logging, prolog, read_kernel, DemoArgs};
use kerna_rs::prelude::*;

const GLOBAL: [usize; 3] = [64, 32, 32];

fn local_size(dims: usize) -> Vec<usize> {
    match dims {
        1 => vec![32],
        2 => vec![16, 16],
        _ => vec![8, 8, 4],
    }
}

fn main() {
    let args = DemoArgs::from_env();
    init_logging(args.debug);
    let config = args.config();

    let dims = args.number.unwrap_or(1);
    if !(1..=3).contains(&dims) {
        eprintln!("number of dimensions must be 1, 2 or 3 (got {})", dims);
        std::process::exit(1);
    }

    let (catalog, platform) = prolog(&args, &config);
    let devices = check(
        "clGetDeviceIDs",
        catalog.list_devices(&platform, DeviceFilter::Default),
    );

    // one queue, on the first device of the context
    let context = check("clCreateContext", Context::open(&catalog, &devices));
    let queue = check("clCreateCommandQueue", context.open_queue(&devices[0]));

    let source = read_kernel(&args.kernel_path("HelloOpenCL.cl"));
    let cache = ProgramCache::new(&config);
    let program = check("clBuildProgram", cache.build(&context, &source, &devices));
    let kernel = check("clCreateKernel", program.kernel("helloOpenCL"));

    let work = WorkSize::new(&GLOBAL[..dims]).with_local(&local_size(dims));
    let launched = check("clEnqueueNDRangeKernel", queue.dispatch(&kernel, &work));
    check("clWaitForEvents", launched.wait());
    check("clFinish", queue.finish());

    println!(
        "helloOpenCL ran {} work-items ({}) on {}",
        work.total_items(),
        work,
        queue.device()
    );

    kernel.release();
    program.release();
    queue.release();
    context.close();
}
