use kerna_rs::driver::host::{KernelArgs, KernelFault, NativeKernel, WorkGroup};
use kerna_rs::driver::{ArgKind, DeviceKind, HostDeviceSpec, HostDriver, HostPlatformSpec};
use kerna_rs::prelude::*;
use kerna_rs::select_device;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

fn kernel_source(file: &str) -> String {
    let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "kernels", file].iter().collect();
    load_source(path).unwrap()
}

fn config() -> Config {
    Config::builder()
        .compute_units(4)
        .interactive(false)
        .build()
        .unwrap()
}

struct Setup {
    catalog: DeviceCatalog,
    context: Context,
    queue: Queue,
    device: Device,
}

fn setup(filter: DeviceFilter) -> Setup {
    let catalog = DeviceCatalog::host(&config()).unwrap();
    let platform = catalog.platforms()[0].clone();
    let device = catalog.list_devices(&platform, filter).unwrap().remove(0);
    let context = Context::open(&catalog, &[device.clone()]).unwrap();
    let queue = context.open_queue(&device).unwrap();
    Setup {
        catalog,
        context,
        queue,
        device,
    }
}

#[test]
fn test_all_devices_cover_cpu_and_gpu() {
    let catalog = DeviceCatalog::host(&config()).unwrap();
    for platform in catalog.platforms() {
        let ids = |filter: DeviceFilter| -> HashSet<_> {
            catalog
                .list_devices(platform, filter)
                .map(|d| d.iter().map(Device::id).collect())
                .unwrap_or_default()
        };
        let all = ids(DeviceFilter::All);
        assert!(ids(DeviceFilter::Cpu).is_subset(&all));
        assert!(ids(DeviceFilter::Gpu).is_subset(&all));
        assert!(ids(DeviceFilter::Default).is_subset(&all));
    }
}

#[test]
fn test_no_platform() {
    let driver = HostDriver::builder().build();
    let err = DeviceCatalog::discover(Arc::new(driver)).unwrap_err();
    assert!(matches!(err, Error::NoPlatform));
}

#[test]
fn test_missing_device_kind() {
    let driver = HostDriver::builder()
        .platform(HostPlatformSpec::new("cpu only").device(HostDeviceSpec::cpu(&config())))
        .build();
    let catalog = DeviceCatalog::discover(Arc::new(driver)).unwrap();
    let platform = catalog.platforms()[0].clone();

    let err = catalog
        .list_devices(&platform, DeviceFilter::Accelerator)
        .unwrap_err();
    assert!(matches!(err, Error::NoDevice { .. }));
}

#[test]
fn test_build_signatures_are_deterministic() {
    let s = setup(DeviceFilter::Cpu);
    let source = kernel_source("saxpy.cl");
    let config = Config::builder().cache_programs(false).build().unwrap();
    let cache = ProgramCache::new(&config);

    let first = cache.build(&s.context, &source, &[]).unwrap();
    let second = cache.build(&s.context, &source, &[]).unwrap();
    assert_eq!(first.signatures(), second.signatures());

    let kernel = first.kernel("saxpy").unwrap();
    assert_eq!(
        kernel.signature().arg_kinds(),
        vec![
            ArgKind::Scalar { size: 4 },
            ArgKind::GlobalBuffer,
            ArgKind::GlobalBuffer,
            ArgKind::Scalar { size: 4 },
            ArgKind::GlobalBuffer,
        ]
    );
}

#[test]
fn test_trig_table_matches_host_within_tolerance() {
    const N: usize = 16384;
    let s = setup(DeviceFilter::Default);

    let d_theta = std::f32::consts::PI / (N - 1) as f32;
    let a: Vec<f32> = (0..N).map(|i| i as f32 * d_theta).collect();
    let b: Vec<f32> = a.iter().map(|t| std::f32::consts::PI - t).collect();

    let buf_a = Buffer::allocate_for::<f32>(&s.context, N, AccessMode::ReadOnly).unwrap();
    let buf_b = Buffer::allocate_for::<f32>(&s.context, N, AccessMode::ReadOnly).unwrap();
    let buf_c = Buffer::allocate_for::<f32>(&s.context, 2 * N, AccessMode::WriteOnly).unwrap();
    s.queue.upload(&buf_a, &a, false).unwrap();
    s.queue.upload(&buf_b, &b, false).unwrap();

    let program = ProgramCache::default()
        .build(&s.context, &kernel_source("SimpleOpenCL.cl"), &[])
        .unwrap();
    let mut kernel = program.kernel("trigTable").unwrap();
    kernel.set_arg(0, &buf_a).unwrap();
    kernel.set_arg(1, &buf_b).unwrap();
    kernel.set_arg(2, &buf_c).unwrap();
    s.queue.dispatch(&kernel, &WorkSize::one_d(N)).unwrap();

    let mut c = vec![0f32; 2 * N];
    s.queue.download(&buf_c, &mut c).unwrap();

    for i in 0..N {
        assert!((f64::from(c[2 * i]) - f64::from(a[i]).cos()).abs() <= 1e-5);
        assert!((f64::from(c[2 * i + 1]) - f64::from(b[i]).sin()).abs() <= 1e-5);
    }
}

fn run_saxpy(s: &Setup, n: usize) -> Vec<f32> {
    let x = Buffer::allocate_for::<f32>(&s.context, n, AccessMode::ReadOnly).unwrap();
    let y = Buffer::allocate_for::<f32>(&s.context, n, AccessMode::ReadOnly).unwrap();
    let z = Buffer::allocate_for::<f32>(&s.context, n, AccessMode::WriteOnly).unwrap();
    s.queue.upload(&x, &vec![1000.0f32; n], false).unwrap();
    s.queue.upload(&y, &vec![10.0f32; n], false).unwrap();
    s.queue.upload(&z, &vec![-999.99f32; n], false).unwrap();

    let program = ProgramCache::default()
        .build(&s.context, &kernel_source("saxpy.cl"), &[])
        .unwrap();
    let mut kernel = program.kernel("saxpy").unwrap();
    kernel.set_arg(0, 2.0f32).unwrap();
    kernel.set_arg(1, &x).unwrap();
    kernel.set_arg(2, &y).unwrap();
    kernel.set_arg(3, n as i32).unwrap();
    kernel.set_arg(4, &z).unwrap();
    s.queue.dispatch(&kernel, &WorkSize::one_d(n)).unwrap();

    let mut out = vec![0f32; n];
    s.queue.download(&z, &mut out).unwrap();
    out
}

#[test]
fn test_saxpy_is_exact() {
    let cpu = setup(DeviceFilter::Cpu);
    assert!(run_saxpy(&cpu, 20).iter().all(|&v| v == 2010.0));

    let gpu = setup(DeviceFilter::Gpu);
    assert!(run_saxpy(&gpu, 1000).iter().all(|&v| v == 2010.0));
}

#[test]
fn test_matrix_multiply_is_exact() {
    let n = 20;
    let catalog = DeviceCatalog::host(&config()).unwrap();
    let candidates = catalog.find_devices(DeviceFilter::All, |d| {
        d.supports(Capability::DoublePrecision)
    });
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].kind(), DeviceKind::Cpu);

    let device = DeviceSelector::new(&candidates)
        .requirement("double precision")
        .interactive(false)
        .select(Cursor::new(""), &mut Vec::new())
        .unwrap();
    let context = Context::open(&catalog, &[device.clone()]).unwrap();
    let queue = context.open_queue(&device).unwrap();

    let mut a = vec![0f64; n * n];
    for i in 0..n {
        a[i * n + i] = 2.0;
    }
    let d_a = Buffer::allocate_for::<f64>(&context, n * n, AccessMode::ReadOnly).unwrap();
    let d_b = Buffer::allocate_for::<f64>(&context, n * n, AccessMode::ReadOnly).unwrap();
    let d_c = Buffer::allocate_for::<f64>(&context, n * n, AccessMode::WriteOnly).unwrap();
    queue.upload(&d_a, &a, false).unwrap();
    queue.upload(&d_b, &vec![17.5f64; n * n], false).unwrap();

    let program = ProgramCache::default()
        .build(&context, &kernel_source("matrixMultiplyV1.cl"), &[])
        .unwrap();
    let mut kernel = program.kernel("matrixMultiply").unwrap();
    kernel.set_arg(0, &d_a).unwrap();
    kernel.set_arg(1, &d_b).unwrap();
    kernel.set_arg(2, &d_c).unwrap();
    kernel.set_arg(3, n as i32).unwrap();
    queue.dispatch(&kernel, &WorkSize::two_d(n, n)).unwrap();

    let c = queue.download_async::<f64>(&d_c).unwrap().wait().unwrap();
    assert_eq!(c.len(), n * n);
    assert!(c.iter().all(|&v| v == 35.0));
}

#[test]
fn test_fp64_source_fails_on_gpu_with_log() {
    let s = setup(DeviceFilter::Gpu);
    let err = ProgramCache::default()
        .build(&s.context, &kernel_source("matrixMultiplyV1.cl"), &[])
        .unwrap_err();

    let build = err.build_log().unwrap();
    let log = build.log_for(s.device.id()).unwrap();
    assert!(log.contains("cl_khr_fp64"));
    assert!(log.ends_with("error(s) generated."));
}

#[test]
fn test_invalid_work_size_enqueues_nothing() {
    let s = setup(DeviceFilter::Cpu);
    let program = ProgramCache::default()
        .build(&s.context, &kernel_source("HelloOpenCL.cl"), &[])
        .unwrap();
    let kernel = program.kernel("helloOpenCL").unwrap();
    let before = s.queue.submitted();

    let invalid = [
        WorkSize::new(&[]),
        WorkSize::new(&[1, 1, 1, 1]),
        WorkSize::one_d(0),
        WorkSize::one_d(64).with_local(&[48]),
        WorkSize::two_d(64, 32).with_local(&[16]),
        WorkSize::one_d(4096).with_local(&[2048]),
        WorkSize::three_d(usize::MAX / 2, 4, 1),
    ];
    for work in &invalid {
        let err = s.queue.dispatch(&kernel, work).unwrap_err();
        assert!(matches!(err, Error::InvalidWorkSize(_)), "{}", work);
    }
    assert_eq!(s.queue.submitted(), before);
    s.queue.finish().unwrap();
}

#[test]
fn test_unbound_argument() {
    let s = setup(DeviceFilter::Cpu);
    let program = ProgramCache::default()
        .build(&s.context, &kernel_source("saxpy.cl"), &[])
        .unwrap();
    let mut kernel = program.kernel("saxpy").unwrap();
    kernel.set_arg(0, 2.0f32).unwrap();

    let err = s.queue.dispatch(&kernel, &WorkSize::one_d(4)).unwrap_err();
    assert!(matches!(err, Error::UnboundArgument { index: 1, .. }));
    assert_eq!(s.queue.submitted(), 0);
}

#[test]
fn test_argument_type_mismatch() {
    let s = setup(DeviceFilter::Cpu);
    let program = ProgramCache::default()
        .build(&s.context, &kernel_source("saxpy.cl"), &[])
        .unwrap();
    let mut kernel = program.kernel("saxpy").unwrap();
    let buffer = Buffer::allocate(&s.context, 64, AccessMode::ReadWrite).unwrap();

    assert!(matches!(
        kernel.set_arg(0, &buffer),
        Err(Error::ArgumentTypeMismatch { index: 0, .. })
    ));
    assert!(matches!(
        kernel.set_arg(3, 20u64),
        Err(Error::ArgumentTypeMismatch { index: 3, .. })
    ));
    assert!(matches!(
        kernel.set_arg(5, 1i32),
        Err(Error::InvalidArgumentIndex { index: 5, count: 5 })
    ));
    assert!(matches!(
        program.kernel("daxpy"),
        Err(Error::KernelNotFound { .. })
    ));
}

#[test]
fn test_close_invalidates_everything() {
    let s = setup(DeviceFilter::Cpu);
    let buffer = Buffer::allocate(&s.context, 64, AccessMode::ReadWrite).unwrap();
    let program = ProgramCache::default()
        .build(&s.context, &kernel_source("HelloOpenCL.cl"), &[])
        .unwrap();
    let kernel = program.kernel("helloOpenCL").unwrap();

    s.context.close();
    s.context.close();

    assert!(buffer.is_released());
    assert!(program.is_released());
    assert!(kernel.is_released());
    assert_eq!(s.context.allocated_bytes(), 0);
    assert!(matches!(
        s.queue.upload(&buffer, &[0u8; 8], true),
        Err(Error::UseAfterClose { .. })
    ));
    assert!(matches!(
        s.queue.dispatch(&kernel, &WorkSize::one_d(1)),
        Err(Error::UseAfterClose { .. })
    ));
    assert!(matches!(
        Buffer::allocate(&s.context, 8, AccessMode::ReadOnly),
        Err(Error::UseAfterClose { .. })
    ));
    assert!(matches!(
        ProgramCache::default().build(&s.context, "kernel void helloOpenCL() {}", &[]),
        Err(Error::UseAfterClose { .. })
    ));
}

#[test]
fn test_allocation_limits() {
    let spec = HostDeviceSpec {
        global_mem_size: 4096,
        max_mem_alloc_size: 1024,
        local_mem_size: 256,
        ..HostDeviceSpec::new("tiny", DeviceKind::Accelerator)
    };
    let driver = HostDriver::builder()
        .platform(HostPlatformSpec::new("tiny").device(spec))
        .build();
    let catalog = DeviceCatalog::discover(Arc::new(driver)).unwrap();
    let device = catalog.devices()[0].clone();
    let context = Context::open(&catalog, &[device.clone()]).unwrap();
    let limits = catalog.query_limits(&device);
    assert_eq!(limits.max_mem_alloc_size, 1024);

    assert!(matches!(
        Buffer::allocate(&context, 0, AccessMode::ReadWrite),
        Err(Error::Allocation { requested: 0, .. })
    ));
    assert!(matches!(
        Buffer::allocate(&context, 1025, AccessMode::ReadWrite),
        Err(Error::Allocation { requested: 1025, .. })
    ));

    let held: Vec<Buffer> = (0..4)
        .map(|_| Buffer::allocate(&context, 1024, AccessMode::ReadWrite).unwrap())
        .collect();
    assert_eq!(context.allocated_bytes(), 4096);
    assert!(matches!(
        Buffer::allocate(&context, 1, AccessMode::ReadWrite),
        Err(Error::Allocation { available: 0, .. })
    ));

    held[0].release();
    assert!(Buffer::allocate(&context, 1, AccessMode::ReadWrite).is_ok());
}

#[test]
fn test_program_cache_hits() {
    let s = setup(DeviceFilter::Cpu);
    let cache = ProgramCache::new(&config());
    let source = kernel_source("SimpleOpenCL.cl");

    for _ in 0..3 {
        cache.build(&s.context, &source, &[]).unwrap();
    }
    cache.build(&s.context, &source, &[s.device.clone()]).unwrap();

    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().hits, 3);

    #[cfg(feature = "telemetry")]
    {
        let metrics = s.context.metrics();
        assert_eq!(metrics.builds, 1);
        assert_eq!(metrics.cache_hits, 3);
    }
}

#[test]
fn test_async_download_sees_prior_commands() {
    let s = setup(DeviceFilter::Gpu);
    let n = 256;
    let data: Vec<u32> = (0..n as u32).collect();
    let buffer = Buffer::allocate_for::<u32>(&s.context, n, AccessMode::ReadWrite).unwrap();

    let write = s.queue.upload(&buffer, &data, false).unwrap();
    let read = s.queue.download_async::<u32>(&buffer).unwrap();
    assert_eq!(read.wait().unwrap(), data);
    assert!(write.is_complete());
}

#[derive(Debug)]
struct Fill;

impl NativeKernel for Fill {
    fn name(&self) -> &str {
        "fill"
    }

    fn arg_kinds(&self) -> Vec<ArgKind> {
        vec![ArgKind::GlobalBuffer, ArgKind::Scalar { size: 4 }]
    }

    fn run_group(
        &self,
        group: &WorkGroup,
        args: &KernelArgs,
    ) -> std::result::Result<(), KernelFault> {
        let out = args.global_mut::<u32>(0)?;
        let value: u32 = args.scalar(1)?;
        for item in group.items() {
            out.set(item.global_id(0), value)?;
        }
        Ok(())
    }
}

const FILL: &str = "__kernel void fill(__global uint* out, uint value) { }";

fn fill_setup() -> (DeviceCatalog, Context, Queue, Kernel) {
    let config = config();
    let driver = HostDriver::builder()
        .config(&config)
        .platform(
            HostPlatformSpec::new("fill")
                .device(HostDeviceSpec::new("filler", DeviceKind::Accelerator)),
        )
        .register(Arc::new(Fill))
        .build();
    let catalog = DeviceCatalog::discover(Arc::new(driver)).unwrap();
    let devices = catalog.devices().to_vec();
    let context = Context::open(&catalog, &devices).unwrap();
    let queue = context.open_queue(&devices[0]).unwrap();
    let program = ProgramCache::default().build(&context, FILL, &[]).unwrap();
    let kernel = program.kernel("fill").unwrap();
    (catalog, context, queue, kernel)
}

#[test]
fn test_registered_native_kernel() {
    let (_catalog, context, queue, mut kernel) = fill_setup();
    let buffer = Buffer::allocate_for::<u32>(&context, 100, AccessMode::WriteOnly).unwrap();
    kernel.set_arg(0, &buffer).unwrap();
    kernel.set_arg(1, 7u32).unwrap();

    queue.dispatch(&kernel, &WorkSize::one_d(100)).unwrap();
    let mut out = vec![0u32; 100];
    queue.download(&buffer, &mut out).unwrap();
    assert!(out.iter().all(|&v| v == 7));
}

#[test]
fn test_kernel_fault_surfaces_on_wait() {
    let (_catalog, context, queue, mut kernel) = fill_setup();
    let buffer = Buffer::allocate_for::<u32>(&context, 10, AccessMode::WriteOnly).unwrap();
    kernel.set_arg(0, &buffer).unwrap();
    kernel.set_arg(1, 1u32).unwrap();

    let done = queue.dispatch(&kernel, &WorkSize::one_d(16)).unwrap();
    let err = done.wait().unwrap_err();
    assert!(matches!(err, Error::Execution { ref kernel, .. } if kernel == "fill"));

    assert!(done.wait().is_err());

    // the queue keeps working after a failed launch
    assert!(queue.finish().is_err());
    let ok = queue.dispatch(&kernel, &WorkSize::one_d(10)).unwrap();
    ok.wait().unwrap();
}

#[test]
fn test_kernel_fault_reaches_later_reads_and_finish() {
    let (_catalog, context, queue, mut kernel) = fill_setup();
    let buffer = Buffer::allocate_for::<u32>(&context, 10, AccessMode::WriteOnly).unwrap();
    kernel.set_arg(0, &buffer).unwrap();
    kernel.set_arg(1, 3u32).unwrap();

    // handle dropped without waiting
    queue.dispatch(&kernel, &WorkSize::one_d(16)).unwrap();

    let mut out = vec![0u32; 10];
    let err = queue.download(&buffer, &mut out).unwrap_err();
    assert!(matches!(err, Error::Execution { ref kernel, .. } if kernel == "fill"));
    assert!(matches!(queue.finish(), Err(Error::Execution { .. })));

    // reported once by finish, then cleared
    queue.finish().unwrap();
    queue.download(&buffer, &mut out).unwrap();
}

#[test]
fn test_interactive_selection_from_input() {
    let catalog = DeviceCatalog::host(&config()).unwrap();
    let platform = catalog.platforms()[0].clone();
    let all = catalog.list_devices(&platform, DeviceFilter::All).unwrap();
    assert!(all.len() > 1);

    let mut out = Vec::new();
    let chosen = select_device(&all, true, Cursor::new("-1\n1\n"), &mut out).unwrap();
    assert_eq!(chosen, all[1]);

    let err = select_device(&all, false, Cursor::new("1\n"), &mut Vec::new()).unwrap_err();
    assert!(matches!(err, Error::Selection(_)));
}
