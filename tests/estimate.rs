//! Occupancy-style group size estimation.
//!
//! The host device uses the conservative fallback limits (warp 64, 1024
//! threads per group, 2560 threads per multiprocessor, 36
//! multiprocessors, 64 KiB shared memory), so the numbers here are exact.

use hetra::prelude::*;

fn kernel_with(info: KernelInfo) -> (Accelerator, Kernel) {
    let accel = Context::new()
        .create_host_accelerator()
        .expect("host accelerator is always constructible");
    let kernel = accel
        .load_kernel(&CompiledKernel::new(vec![0u8; 4], "reduce", info))
        .unwrap();
    (accel, kernel)
}

#[test]
fn estimate_picks_largest_qualifying_size() {
    let (accel, kernel) = kernel_with(KernelInfo::default());

    // 4 bytes of dynamic shared memory per thread always fits, so the
    // hardware thread limit wins.
    let (group, min_grid) = accel
        .estimate_group_size(&kernel, |size| size as usize * 4, 0)
        .unwrap();
    assert_eq!(group, 1024);
    // 2560 / 1024 = 2 active groups per multiprocessor, times 36.
    assert_eq!(min_grid, 72);
}

#[test]
fn estimate_is_warp_aligned_and_bounded() {
    let (accel, kernel) = kernel_with(KernelInfo::default());
    let device = accel.device().clone();

    for max in [0u32, 1, 63, 64, 100, 512, 4096] {
        let (group, min_grid) = accel.estimate_group_size(&kernel, |_| 0, max).unwrap();
        assert!(group > 0);
        assert_eq!(group % device.warp_size, 0);
        assert!(group <= device.max_threads_per_group);
        assert!(min_grid > 0);
    }
}

#[test]
fn estimate_respects_caller_limit() {
    let (accel, kernel) = kernel_with(KernelInfo::default());
    let (group, min_grid) = accel.estimate_group_size(&kernel, |_| 0, 100).unwrap();
    // Only one warp fits under a limit of 100 threads.
    assert_eq!(group, 64);
    // 2560 / 64 = 40 active groups per multiprocessor, times 36.
    assert_eq!(min_grid, 1440);
}

#[test]
fn estimate_respects_kernel_thread_hint() {
    let (accel, kernel) = kernel_with(KernelInfo {
        max_threads_per_group: 256,
        ..KernelInfo::default()
    });
    let (group, min_grid) = accel.estimate_group_size(&kernel, |_| 0, 0).unwrap();
    assert_eq!(group, 256);
    assert_eq!(min_grid, 360);
}

#[test]
fn shared_memory_bound_shrinks_group_size() {
    let (accel, kernel) = kernel_with(KernelInfo::default());

    // 96 bytes per thread: 1024 threads would need 96 KiB, over the
    // 64 KiB limit. The largest fitting warp multiple is 640 (60 KiB).
    let (group, _) = accel
        .estimate_group_size(&kernel, |size| size as usize * 96, 0)
        .unwrap();
    assert_eq!(group, 640);
}

#[test]
fn impossible_shared_requirement_falls_back_to_one_warp() {
    let (accel, kernel) = kernel_with(KernelInfo::default());
    let device = accel.device().clone();

    let (group, min_grid) = accel.estimate_group_size(&kernel, |_| usize::MAX, 0).unwrap();
    assert_eq!(group, device.warp_size);
    assert_eq!(min_grid, device.multiprocessor_count);
}
