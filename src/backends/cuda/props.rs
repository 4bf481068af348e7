//! CUDA device property queries.

use crate::backends::Backend;
use crate::device::{DeviceDescriptor, DeviceFeatures};
use cudarc::driver::sys::{self, CUdevice_attribute};

fn attr(device: sys::CUdevice, attribute: CUdevice_attribute) -> Option<i32> {
    unsafe { cudarc::driver::result::device::get_attribute(device, attribute).ok() }
}

fn device_name(device: sys::CUdevice) -> Option<String> {
    let mut buf = [0i8; 256];
    unsafe {
        let result = sys::cuDeviceGetName(buf.as_mut_ptr(), buf.len() as i32, device);
        if result != sys::CUresult::CUDA_SUCCESS {
            return None;
        }
        let cstr = std::ffi::CStr::from_ptr(buf.as_ptr());
        Some(cstr.to_string_lossy().into_owned())
    }
}

fn total_memory(device: sys::CUdevice) -> Option<u64> {
    let mut bytes: usize = 0;
    unsafe {
        let result = sys::cuDeviceTotalMem_v2(&mut bytes, device);
        if result != sys::CUresult::CUDA_SUCCESS {
            return None;
        }
    }
    Some(bytes as u64)
}

/// Query the full property set of a CUDA device.
///
/// Returns `None` when the device cannot be queried, in which case the
/// caller substitutes conservative fallback properties.
pub fn query_device_properties(index: usize) -> Option<DeviceDescriptor> {
    let device = cudarc::driver::result::device::get(index as i32).ok()?;

    let dim = |x, y, z| -> Option<[u32; 3]> {
        Some([attr(device, x)? as u32, attr(device, y)? as u32, attr(device, z)? as u32])
    };

    let max_grid_dim = dim(
        CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_X,
        CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Y,
        CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_GRID_DIM_Z,
    )?;
    let max_group_dim = dim(
        CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X,
        CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Y,
        CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_Z,
    )?;

    let feature = |attribute| attr(device, attribute).map(|v| v != 0).unwrap_or(false);

    Some(DeviceDescriptor {
        backend: Backend::Cuda,
        index,
        name: device_name(device).unwrap_or_else(|| format!("cuda:{index}")),
        total_memory: total_memory(device)?,
        max_grid_dim,
        max_group_dim,
        max_threads_per_group: attr(
            device,
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK,
        )? as u32,
        max_threads_per_multiprocessor: attr(
            device,
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_MULTIPROCESSOR,
        )? as u32,
        multiprocessor_count: attr(
            device,
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT,
        )? as u32,
        warp_size: attr(device, CUdevice_attribute::CU_DEVICE_ATTRIBUTE_WARP_SIZE)? as u32,
        max_shared_memory_per_group: attr(
            device,
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK,
        )? as u32,
        max_constant_memory: attr(
            device,
            CUdevice_attribute::CU_DEVICE_ATTRIBUTE_TOTAL_CONSTANT_MEMORY,
        )? as u32,
        features: DeviceFeatures {
            unified_addressing: feature(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_UNIFIED_ADDRESSING),
            managed_memory: feature(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MANAGED_MEMORY),
            cooperative_launch: feature(
                CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COOPERATIVE_LAUNCH,
            ),
            concurrent_kernels: feature(
                CUdevice_attribute::CU_DEVICE_ATTRIBUTE_CONCURRENT_KERNELS,
            ),
            peer_access: true,
        },
    })
}
