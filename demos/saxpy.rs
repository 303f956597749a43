//! `Z = a * X + Y` with a = 2, X = 1000, Y = 10 on `n` elements (positional
//! argument, default 20). Reports device and kernel limits along the way.

mod common;

use common::{check, init_logging, prolog, read_kernel, DemoArgs};
use kerna_rs::prelude::*;
use std::io;

fn look_at_device_limits(limits: &DeviceLimits) {
    println!("Device global mem size:     {}", limits.global_mem_size);
    println!("Device local mem size:      {}", limits.local_mem_size);
    println!("Device max work group size: {}", limits.max_work_group_size);
    println!("Device max compute units:   {}", limits.max_compute_units);
    println!();
}

fn look_at_kernel_limits(kernel: &Kernel, device: &Device) {
    let info = check("clGetKernelWorkGroupInfo", kernel.work_group_info(device));
    println!("Kernel local memory size:   {}", info.local_mem_size);
    println!("Kernel private memory size: {}", info.private_mem_size);
    println!(
        "Kernel warpSize:            {}",
        info.preferred_work_group_size_multiple
    );
    println!("Kernel max work group size: {}", info.work_group_size);
    println!();
}

fn main() {
    let args = DemoArgs::from_env();
    init_logging(args.debug);
    let config = args.config();
    let n = args.number.unwrap_or(20);
    if n == 0 {
        eprintln!("vector length must be positive");
        std::process::exit(1);
    }

    let (catalog, platform) = prolog(&args, &config);
    let candidates = check("clGetDeviceIDs-1", catalog.preferred_devices(&platform));
    let device = check(
        "selectDevice",
        DeviceSelector::new(&candidates)
            .interactive(config.interactive)
            .select(io::stdin().lock(), &mut io::stdout()),
    );

    let a = 2.0f32;
    let x = vec![1000.0f32; n];
    let y = vec![10.0f32; n];
    let mut z = vec![-999.99f32; n];

    let context = check("clCreateContext", Context::open(&catalog, &[device.clone()]));
    let queue = check("clCreateCommandQueue", context.open_queue(&device));

    let buffer_x = check(
        "clCreateBuffer-X",
        Buffer::allocate_for::<f32>(&context, n, AccessMode::ReadOnly),
    );
    let buffer_y = check(
        "clCreateBuffer-Y",
        Buffer::allocate_for::<f32>(&context, n, AccessMode::ReadOnly),
    );
    let buffer_z = check(
        "clCreateBuffer-Z",
        Buffer::allocate_for::<f32>(&context, n, AccessMode::WriteOnly),
    );
    check("clEnqueueWriteBuffer-X", queue.upload(&buffer_x, &x, false));
    check("clEnqueueWriteBuffer-Y", queue.upload(&buffer_y, &y, false));

    let source = read_kernel(&args.kernel_path("saxpy.cl"));
    let program = check(
        "clBuildProgram",
        ProgramCache::new(&config).build(&context, &source, &[device.clone()]),
    );
    let mut kernel = check("clCreateKernel", program.kernel("saxpy"));

    look_at_device_limits(&catalog.query_limits(&device));
    look_at_kernel_limits(&kernel, &device);

    check("clSetKernelArg-0", kernel.set_arg(0, a));
    check("clSetKernelArg-1", kernel.set_arg(1, &buffer_x));
    check("clSetKernelArg-2", kernel.set_arg(2, &buffer_y));
    check("clSetKernelArg-3", kernel.set_arg(3, n as i32));
    check("clSetKernelArg-4", kernel.set_arg(4, &buffer_z));

    let launched = check(
        "clEnqueueNDRangeKernel",
        queue.dispatch(&kernel, &WorkSize::one_d(n)),
    );
    check("clWaitForEvents", launched.wait());
    check("clEnqueueReadBuffer", queue.download(&buffer_z, &mut z));

    for i in 0..n {
        println!("{} = {} * {}  +  {}", z[i], a, x[i], y[i]);
    }

    // the context would release these on close; done explicitly here
    kernel.release();
    program.release();
    queue.release();
    for buffer in [&buffer_x, &buffer_y, &buffer_z] {
        buffer.release();
    }
    context.close();
}
