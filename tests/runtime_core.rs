//! Integration tests for the core accelerator and buffer lifecycle.
//!
//! These run on the host accelerator, which is always available, so the
//! same suite exercises the degraded (driverless) code path end to end.

use hetra::prelude::*;
use rand::Rng;

fn host_accelerator() -> Accelerator {
    Context::new()
        .create_host_accelerator()
        .expect("host accelerator is always constructible")
}

#[test]
fn allocate_write_read_roundtrip() {
    let accel = host_accelerator();
    let buf = accel.allocate_raw(256, 4).unwrap();
    assert_eq!(buf.len(), 256);
    assert_eq!(buf.elem_size(), 4);
    assert_eq!(buf.len_in_bytes(), 1024);

    let mut rng = rand::thread_rng();
    let data: Vec<u8> = (0..1024).map(|_| rng.gen()).collect();
    buf.write(0, &data).unwrap();

    let mut out = vec![0u8; 1024];
    buf.read(0, &mut out).unwrap();
    assert_eq!(data, out);
}

#[test]
fn allocation_is_zero_initialized() {
    let accel = host_accelerator();
    let buf = accel.allocate_raw(64, 8).unwrap();
    let mut out = vec![0xffu8; 512];
    buf.read(0, &mut out).unwrap();
    assert!(out.iter().all(|&b| b == 0));
}

#[test]
fn host_accelerator_reports_degraded_mode() {
    let accel = host_accelerator();
    assert!(accel.is_simulated());
    assert_eq!(accel.backend(), Backend::Cpu);

    // Degraded allocations are host-backed and say so.
    let buf = accel.allocate_raw(16, 4).unwrap();
    assert!(!buf.is_native_allocation());
    assert!(buf.as_host_slice().is_some());
}

#[test]
fn zero_sized_allocation_is_rejected() {
    let accel = host_accelerator();
    assert!(matches!(
        accel.allocate_raw(0, 4),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        accel.allocate_raw(4, 0),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn oversized_allocation_is_rejected() {
    let accel = host_accelerator();
    assert!(matches!(
        accel.allocate_raw(usize::MAX, 8),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn out_of_range_access_is_rejected() {
    let accel = host_accelerator();
    let buf = accel.allocate_raw(8, 1).unwrap();

    assert!(buf.write(0, &[0u8; 8]).is_ok());
    assert!(matches!(
        buf.write(1, &[0u8; 8]),
        Err(Error::InvalidArgument { .. })
    ));
    let mut out = [0u8; 4];
    assert!(matches!(
        buf.read(5, &mut out),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        buf.fill(0xab, 4, 5, None),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn fill_overwrites_only_requested_range() {
    let accel = host_accelerator();
    let buf = accel.allocate_raw(16, 1).unwrap();
    buf.write(0, &[1u8; 16]).unwrap();
    buf.fill(9, 4, 8, None).unwrap();

    let mut out = [0u8; 16];
    buf.read(0, &mut out).unwrap();
    assert_eq!(&out[..4], &[1, 1, 1, 1]);
    assert_eq!(&out[4..12], &[9; 8]);
    assert_eq!(&out[12..], &[1, 1, 1, 1]);
}

#[test]
fn copy_between_buffers() {
    let accel = host_accelerator();
    let src = accel.allocate_raw(32, 1).unwrap();
    let dst = accel.allocate_raw(32, 1).unwrap();

    let data: Vec<u8> = (0u8..32).collect();
    src.write(0, &data).unwrap();
    dst.copy_from(&src, 0, 0, 32, None).unwrap();

    let mut out = vec![0u8; 32];
    dst.read(0, &mut out).unwrap();
    assert_eq!(data, out);
}

#[test]
fn copy_with_offsets() {
    let accel = host_accelerator();
    let src = accel.allocate_raw(16, 1).unwrap();
    let dst = accel.allocate_raw(16, 1).unwrap();

    src.write(0, &(0u8..16).collect::<Vec<_>>()).unwrap();
    dst.copy_from(&src, 4, 8, 4, None).unwrap();

    let mut out = [0u8; 16];
    dst.read(0, &mut out).unwrap();
    assert_eq!(&out[8..12], &[4, 5, 6, 7]);
    assert!(out[..8].iter().all(|&b| b == 0));
}

#[test]
fn cross_accelerator_host_copy_is_allowed() {
    let ctx = Context::new();
    let a = ctx.create_host_accelerator().unwrap();
    let b = ctx.create_host_accelerator().unwrap();

    let src = a.allocate_raw(8, 1).unwrap();
    let dst = b.allocate_raw(8, 1).unwrap();
    src.write(0, &[7u8; 8]).unwrap();

    // Both endpoints are CPU-addressable, so no peer access is needed.
    dst.copy_from(&src, 0, 0, 8, None).unwrap();
    let mut out = [0u8; 8];
    dst.read(0, &mut out).unwrap();
    assert_eq!(out, [7u8; 8]);
}

#[test]
fn buffer_dispose_is_idempotent() {
    let accel = host_accelerator();
    let buf = accel.allocate_raw(8, 1).unwrap();

    buf.dispose();
    buf.dispose();
    assert!(buf.is_disposed());

    assert!(matches!(buf.write(0, &[1]), Err(Error::Disposed(_))));
    let mut out = [0u8; 1];
    assert!(matches!(buf.read(0, &mut out), Err(Error::Disposed(_))));
    assert!(buf.as_host_slice().is_none());
}

#[test]
fn accelerator_dispose_fails_dependent_operations() {
    let accel = host_accelerator();
    let buf = accel.allocate_raw(8, 1).unwrap();

    accel.dispose();
    accel.dispose();
    assert!(accel.is_disposed());

    assert!(matches!(accel.allocate_raw(8, 1), Err(Error::Disposed(_))));
    assert!(matches!(accel.synchronize(), Err(Error::Disposed(_))));
    assert!(matches!(buf.write(0, &[1]), Err(Error::Disposed(_))));

    // Buffer disposal still works after the accelerator is gone.
    buf.dispose();
    assert!(buf.is_disposed());
}

#[test]
fn group_size_estimation_after_dispose_fails() {
    let accel = host_accelerator();
    let kernel = accel
        .load_kernel(&CompiledKernel::new(vec![0u8; 4], "reduce", KernelInfo::default()))
        .unwrap();

    accel.dispose();
    assert!(matches!(
        accel.estimate_group_size(&kernel, |_| 0, 0),
        Err(Error::Disposed(_))
    ));
}

#[test]
fn stream_lifecycle() {
    let accel = host_accelerator();
    let stream = accel.create_stream().unwrap();
    stream.synchronize().unwrap();

    stream.dispose();
    stream.dispose();
    assert!(stream.is_disposed());
    assert!(matches!(stream.synchronize(), Err(Error::Disposed(_))));
}

#[test]
fn default_stream_view_does_not_tear_down_accelerator() {
    let accel = host_accelerator();
    let default = accel.default_stream();
    default.synchronize().unwrap();
    default.dispose();

    // Disposing the view leaves the accelerator usable.
    accel.synchronize().unwrap();
    let buf = accel.allocate_raw(4, 1).unwrap();
    buf.write(0, &[1, 2, 3, 4]).unwrap();
}

#[test]
fn host_slice_mut_writes_are_visible_to_read() {
    let accel = host_accelerator();
    let mut buf = accel.allocate_raw(4, 1).unwrap();
    {
        let slice = buf.as_host_slice_mut().unwrap();
        slice.copy_from_slice(&[9, 8, 7, 6]);
    }
    let mut out = [0u8; 4];
    buf.read(0, &mut out).unwrap();
    assert_eq!(out, [9, 8, 7, 6]);
}

#[test]
fn matmul_on_host_buffers() {
    let accel = host_accelerator();
    let a = accel.allocate_raw(4, 4).unwrap();
    let b = accel.allocate_raw(4, 4).unwrap();
    let mut c = accel.allocate_raw(4, 4).unwrap();

    // [1 2; 3 4] * [5 6; 7 8] = [19 22; 43 50]
    a.write(0, bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]))
        .unwrap();
    b.write(0, bytemuck::cast_slice(&[5.0f32, 6.0, 7.0, 8.0]))
        .unwrap();
    execute_matmul(&a, &b, &mut c, 2, 2, 2, None).unwrap();

    let mut out = [0u8; 16];
    c.read(0, &mut out).unwrap();
    let result: &[f32] = bytemuck::cast_slice(&out);
    assert_eq!(result, &[19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn matmul_rejects_undersized_operands() {
    let accel = host_accelerator();
    let a = accel.allocate_raw(2, 4).unwrap();
    let b = accel.allocate_raw(4, 4).unwrap();
    let mut c = accel.allocate_raw(4, 4).unwrap();
    assert!(matches!(
        execute_matmul(&a, &b, &mut c, 2, 2, 2, None),
        Err(Error::InvalidArgument { .. })
    ));
}
