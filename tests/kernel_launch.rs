//! Kernel loading, launch validation, and the degraded-launch policy.

use hetra::prelude::*;

fn host_accelerator() -> Accelerator {
    Context::new()
        .create_host_accelerator()
        .expect("host accelerator is always constructible")
}

fn dummy_kernel() -> CompiledKernel {
    CompiledKernel::new(vec![0xde, 0xad, 0xbe, 0xef], "vector_add", KernelInfo::default())
}

#[test]
fn simulated_accelerator_never_loads_native_code() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();
    assert!(!kernel.is_loaded());
    assert_eq!(kernel.entry(), "vector_add");
}

#[test]
fn launching_not_loaded_kernel_is_a_noop() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();

    let buf = accel.allocate_raw(64, 4).unwrap();
    buf.fill(0x41, 0, 256, None).unwrap();

    let params = KernelParams::new().buffer(&buf).u32(64);
    kernel
        .launch(LaunchConfig::for_len(64, 64), None, params)
        .unwrap();
    accel.synchronize().unwrap();

    // The simulated launch must leave buffer contents untouched.
    let mut out = vec![0u8; 256];
    buf.read(0, &mut out).unwrap();
    assert!(out.iter().all(|&b| b == 0x41));
}

#[test]
fn launch_on_explicit_stream() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();
    let stream = accel.create_stream().unwrap();

    kernel
        .launch(
            LaunchConfig::for_len(128, 32),
            Some(&stream),
            KernelParams::new(),
        )
        .unwrap();
    stream.synchronize().unwrap();
}

#[test]
fn zero_group_dimension_is_rejected() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();
    let config = LaunchConfig {
        grid_dim: [1, 1, 1],
        group_dim: [0, 1, 1],
        shared_mem_bytes: 0,
    };
    assert!(matches!(
        kernel.launch(config, None, KernelParams::new()),
        Err(Error::LaunchConfig { .. })
    ));
}

#[test]
fn oversized_group_dimension_is_rejected() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();
    let limit = accel.device().max_group_dim[0];
    let config = LaunchConfig {
        grid_dim: [1, 1, 1],
        group_dim: [limit + 1, 1, 1],
        shared_mem_bytes: 0,
    };
    assert!(matches!(
        kernel.launch(config, None, KernelParams::new()),
        Err(Error::LaunchConfig { .. })
    ));
}

#[test]
fn group_thread_product_over_limit_is_rejected() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();
    // Each axis is inside its own limit, but the product exceeds the
    // per-group thread limit.
    let config = LaunchConfig {
        grid_dim: [1, 1, 1],
        group_dim: [1024, 2, 1],
        shared_mem_bytes: 0,
    };
    assert!(matches!(
        kernel.launch(config, None, KernelParams::new()),
        Err(Error::LaunchConfig { .. })
    ));
}

#[test]
fn oversized_grid_dimension_is_rejected() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();
    let limit = accel.device().max_grid_dim[1];
    let config = LaunchConfig {
        grid_dim: [1, limit + 1, 1],
        group_dim: [64, 1, 1],
        shared_mem_bytes: 0,
    };
    assert!(matches!(
        kernel.launch(config, None, KernelParams::new()),
        Err(Error::LaunchConfig { .. })
    ));
}

#[test]
fn launch_on_disposed_stream_fails_even_when_simulated() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();
    let stream = accel.create_stream().unwrap();
    stream.dispose();

    // The not-loaded no-op path must still validate the stream.
    assert!(!kernel.is_loaded());
    assert!(matches!(
        kernel.launch(
            LaunchConfig::for_len(64, 64),
            Some(&stream),
            KernelParams::new()
        ),
        Err(Error::Disposed(_))
    ));
}

#[test]
fn launch_after_kernel_dispose_fails() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();
    kernel.dispose();
    kernel.dispose();
    assert!(kernel.is_disposed());
    assert!(matches!(
        kernel.launch(LaunchConfig::for_len(1, 1), None, KernelParams::new()),
        Err(Error::Disposed(_))
    ));
}

#[test]
fn launch_after_accelerator_dispose_fails() {
    let accel = host_accelerator();
    let kernel = accel.load_kernel(&dummy_kernel()).unwrap();
    accel.dispose();
    assert!(matches!(
        kernel.launch(LaunchConfig::for_len(1, 1), None, KernelParams::new()),
        Err(Error::Disposed(_))
    ));
}

#[test]
fn for_len_covers_all_elements() {
    let config = LaunchConfig::for_len(1000, 256);
    assert_eq!(config.group_dim, [256, 1, 1]);
    assert_eq!(config.grid_dim, [4, 1, 1]);
    assert!(u64::from(config.grid_dim[0]) * u64::from(config.group_dim[0]) >= 1000);

    // Zero-length work still gets one group.
    let empty = LaunchConfig::for_len(0, 128);
    assert_eq!(empty.grid_dim, [1, 1, 1]);
}
