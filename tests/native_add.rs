//! Element-wise addition through the CUDA backend.
//!
//! Requires the `cuda` feature; the test skips at runtime when no CUDA
//! device is visible so the suite stays green on driverless machines.

#![cfg(feature = "cuda")]

use hetra::prelude::*;

/// `c[i] = a[i] + b[i]` over f32, one thread per element.
const VECTOR_ADD_PTX: &str = r#"
.version 7.0
.target sm_50
.address_size 64

.visible .entry vector_add(
    .param .u64 a,
    .param .u64 b,
    .param .u64 c,
    .param .u32 n
)
{
    .reg .pred %p1;
    .reg .b32 %r<6>;
    .reg .f32 %f<4>;
    .reg .b64 %rd<11>;

    ld.param.u64 %rd1, [a];
    ld.param.u64 %rd2, [b];
    ld.param.u64 %rd3, [c];
    ld.param.u32 %r2, [n];
    mov.u32 %r3, %ctaid.x;
    mov.u32 %r4, %ntid.x;
    mov.u32 %r5, %tid.x;
    mad.lo.s32 %r1, %r3, %r4, %r5;
    setp.ge.s32 %p1, %r1, %r2;
    @%p1 bra DONE;
    cvta.to.global.u64 %rd4, %rd1;
    mul.wide.s32 %rd5, %r1, 4;
    add.s64 %rd6, %rd4, %rd5;
    cvta.to.global.u64 %rd7, %rd2;
    add.s64 %rd8, %rd7, %rd5;
    ld.global.f32 %f1, [%rd6];
    ld.global.f32 %f2, [%rd8];
    add.f32 %f3, %f1, %f2;
    cvta.to.global.u64 %rd9, %rd3;
    add.s64 %rd10, %rd9, %rd5;
    st.global.f32 [%rd10], %f3;
DONE:
    ret;
}
"#;

fn compiled_vector_add() -> CompiledKernel {
    // cuModuleLoadData takes PTX as NUL-terminated text.
    let mut image = VECTOR_ADD_PTX.as_bytes().to_vec();
    image.push(0);
    CompiledKernel::new(image, "vector_add", KernelInfo::default())
}

#[test]
fn elementwise_add_on_cuda_device() {
    let ctx = Context::new();
    let Some(device) = ctx
        .devices()
        .into_iter()
        .find(|d| d.backend == Backend::Cuda)
    else {
        eprintln!("no CUDA device visible, skipping");
        return;
    };

    let accel = ctx.create_accelerator(&device).unwrap();
    assert!(!accel.is_simulated());

    const N: usize = 256;
    let a = accel.allocate_raw(N, 4).unwrap();
    let b = accel.allocate_raw(N, 4).unwrap();
    let c = accel.allocate_raw(N, 4).unwrap();

    let a_host: Vec<f32> = (0..N).map(|i| i as f32).collect();
    let b_host: Vec<f32> = (0..N).map(|i| (2 * i) as f32).collect();
    a.write(0, bytemuck::cast_slice(&a_host)).unwrap();
    b.write(0, bytemuck::cast_slice(&b_host)).unwrap();

    let kernel = accel.load_kernel(&compiled_vector_add()).unwrap();
    assert!(kernel.is_loaded());

    // One warp per group, enough groups to cover every element.
    let warp = accel.device().warp_size;
    let config = LaunchConfig::for_len(N, warp);
    assert_eq!(config.grid_dim[0], (N as u32).div_ceil(warp));

    let params = KernelParams::new()
        .buffer(&a)
        .buffer(&b)
        .buffer(&c)
        .u32(N as u32);
    kernel.launch(config, None, params).unwrap();
    accel.synchronize().unwrap();

    let mut out = vec![0u8; N * 4];
    c.read(0, &mut out).unwrap();
    let result: &[f32] = bytemuck::cast_slice(&out);
    for (i, &value) in result.iter().enumerate() {
        assert_eq!(value, (3 * i) as f32, "element {i}");
    }
}
