//! ROCm/HIP backend
//!
//! Realizes [`NativeDriver`] over the HIP runtime API via raw bindings
//! against `amdhip64`. The HIP runtime model is device-oriented rather
//! than context-oriented: `hipSetDevice` selects the active device per
//! thread and no explicit context object exists, so context handles at
//! this layer are synthetic tokens.

mod ffi;

use super::{Backend, CopyKind, NativeDriver};
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use std::ffi::{c_int, c_void, CString};
use std::sync::OnceLock;

fn check(result: ffi::hipError_t) -> Result<()> {
    if result == ffi::HIP_SUCCESS {
        Ok(())
    } else {
        Err(Error::native(Backend::Hip, result))
    }
}

fn copy_kind_code(kind: CopyKind) -> c_int {
    match kind {
        CopyKind::HostToHost => ffi::HIP_MEMCPY_HOST_TO_HOST,
        CopyKind::HostToDevice => ffi::HIP_MEMCPY_HOST_TO_DEVICE,
        CopyKind::DeviceToHost => ffi::HIP_MEMCPY_DEVICE_TO_HOST,
        CopyKind::DeviceToDevice => ffi::HIP_MEMCPY_DEVICE_TO_DEVICE,
    }
}

/// Check if the HIP runtime is usable on this system.
///
/// Probing runs `hipInit` behind `catch_unwind` and requires at least
/// one visible device; the answer is cached for the process lifetime.
pub fn is_hip_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        std::panic::catch_unwind(|| unsafe {
            if ffi::hipInit(0) != ffi::HIP_SUCCESS {
                return false;
            }
            let mut count: c_int = 0;
            ffi::hipGetDeviceCount(&mut count) == ffi::HIP_SUCCESS && count > 0
        })
        .unwrap_or(false)
    })
}

fn device_name(index: usize) -> Option<String> {
    let mut buf = [0i8; 256];
    unsafe {
        if ffi::hipDeviceGetName(buf.as_mut_ptr(), buf.len() as c_int, index as c_int)
            != ffi::HIP_SUCCESS
        {
            return None;
        }
        let cstr = std::ffi::CStr::from_ptr(buf.as_ptr());
        Some(cstr.to_string_lossy().into_owned())
    }
}

fn total_memory(index: usize) -> Option<u64> {
    let mut bytes: usize = 0;
    unsafe {
        if ffi::hipDeviceTotalMem(&mut bytes, index as c_int) != ffi::HIP_SUCCESS {
            return None;
        }
    }
    Some(bytes as u64)
}

/// HIP runtime adapter.
#[derive(Debug, Clone, Default)]
pub struct HipDriver;

impl HipDriver {
    /// Create the HIP driver adapter
    pub fn new() -> Self {
        Self
    }
}

impl NativeDriver for HipDriver {
    fn backend(&self) -> Backend {
        Backend::Hip
    }

    fn is_available(&self) -> bool {
        is_hip_available()
    }

    fn init(&self) -> Result<()> {
        if !is_hip_available() {
            return Err(Error::native(Backend::Hip, 3));
        }
        unsafe { check(ffi::hipInit(0)) }
    }

    fn device_count(&self) -> usize {
        if !is_hip_available() {
            return 0;
        }
        let mut count: c_int = 0;
        let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
        if result != ffi::HIP_SUCCESS {
            return 0;
        }
        count.max(0) as usize
    }

    /// Dimensional limits come from the conservative CDNA/RDNA defaults;
    /// only name and memory size are queried live. The attribute enum
    /// ordinals shift between ROCm releases, so querying them through a
    /// hand-written binding is not robust.
    fn device_properties(&self, index: usize) -> Option<DeviceDescriptor> {
        let mut descriptor = DeviceDescriptor::fallback(Backend::Hip, index);
        descriptor.name = device_name(index)?;
        descriptor.total_memory = total_memory(index)?;
        Some(descriptor)
    }

    fn set_device(&self, index: usize) -> Result<()> {
        let count = self.device_count();
        if index >= count {
            return Err(Error::DeviceOutOfRange {
                backend: Backend::Hip,
                index,
                count,
            });
        }
        unsafe { check(ffi::hipSetDevice(index as c_int)) }
    }

    fn create_context(&self, index: usize) -> Result<u64> {
        self.set_device(index)?;
        // No context object in the HIP runtime model; the token only has
        // to be non-zero and stable for the device.
        Ok(index as u64 + 1)
    }

    fn destroy_context(&self, _ctx: u64) -> Result<()> {
        Ok(())
    }

    fn malloc(&self, bytes: usize) -> Result<u64> {
        if bytes == 0 {
            return Ok(0);
        }
        unsafe {
            let mut ptr: *mut c_void = std::ptr::null_mut();
            let result = ffi::hipMalloc(&mut ptr, bytes);
            if result != ffi::HIP_SUCCESS {
                return Err(Error::native(Backend::Hip, result));
            }
            Ok(ptr as u64)
        }
    }

    fn free(&self, ptr: u64, _bytes: usize) -> Result<()> {
        if ptr == 0 {
            return Ok(());
        }
        unsafe { check(ffi::hipFree(ptr as *mut c_void)) }
    }

    fn memcpy(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        kind: CopyKind,
        stream: Option<u64>,
    ) -> Result<()> {
        if bytes == 0 || dst == 0 || src == 0 {
            return Ok(());
        }
        let code = copy_kind_code(kind);
        unsafe {
            let result = match stream {
                None => ffi::hipMemcpy(dst as *mut c_void, src as *const c_void, bytes, code),
                Some(s) => ffi::hipMemcpyAsync(
                    dst as *mut c_void,
                    src as *const c_void,
                    bytes,
                    code,
                    s as ffi::hipStream_t,
                ),
            };
            check(result)
        }
    }

    fn memset(&self, ptr: u64, value: u8, bytes: usize, stream: Option<u64>) -> Result<()> {
        if bytes == 0 || ptr == 0 {
            return Ok(());
        }
        unsafe {
            let result = match stream {
                None => ffi::hipMemset(ptr as *mut c_void, value as c_int, bytes),
                Some(s) => ffi::hipMemsetAsync(
                    ptr as *mut c_void,
                    value as c_int,
                    bytes,
                    s as ffi::hipStream_t,
                ),
            };
            check(result)
        }
    }

    fn stream_create(&self) -> Result<u64> {
        unsafe {
            let mut stream: ffi::hipStream_t = std::ptr::null_mut();
            check(ffi::hipStreamCreate(&mut stream))?;
            Ok(stream as u64)
        }
    }

    fn stream_destroy(&self, stream: u64) -> Result<()> {
        if stream == 0 {
            return Ok(());
        }
        unsafe { check(ffi::hipStreamDestroy(stream as ffi::hipStream_t)) }
    }

    fn stream_synchronize(&self, stream: u64) -> Result<()> {
        unsafe {
            if stream == 0 {
                check(ffi::hipDeviceSynchronize())
            } else {
                check(ffi::hipStreamSynchronize(stream as ffi::hipStream_t))
            }
        }
    }

    fn module_load(&self, image: &[u8]) -> Result<u64> {
        if image.is_empty() {
            return Err(Error::invalid_argument("image", "empty module image"));
        }
        unsafe {
            let mut module: ffi::hipModule_t = std::ptr::null_mut();
            check(ffi::hipModuleLoadData(
                &mut module,
                image.as_ptr() as *const c_void,
            ))?;
            Ok(module as u64)
        }
    }

    fn module_get_function(&self, module: u64, name: &str) -> Result<u64> {
        let c_name = CString::new(name)
            .map_err(|_| Error::invalid_argument("name", "entry point contains NUL"))?;
        unsafe {
            let mut func: ffi::hipFunction_t = std::ptr::null_mut();
            check(ffi::hipModuleGetFunction(
                &mut func,
                module as ffi::hipModule_t,
                c_name.as_ptr(),
            ))?;
            Ok(func as u64)
        }
    }

    fn module_unload(&self, module: u64) -> Result<()> {
        if module == 0 {
            return Ok(());
        }
        unsafe { check(ffi::hipModuleUnload(module as ffi::hipModule_t)) }
    }

    fn launch_kernel(
        &self,
        func: u64,
        grid: [u32; 3],
        group: [u32; 3],
        shared_mem_bytes: u32,
        stream: u64,
        params: &mut [*mut c_void],
    ) -> Result<()> {
        unsafe {
            check(ffi::hipModuleLaunchKernel(
                func as ffi::hipFunction_t,
                grid[0],
                grid[1],
                grid[2],
                group[0],
                group[1],
                group[2],
                shared_mem_bytes,
                stream as ffi::hipStream_t,
                params.as_mut_ptr(),
                std::ptr::null_mut(),
            ))
        }
    }

    fn can_access_peer(&self, device: usize, peer: usize) -> bool {
        let mut accessible: c_int = 0;
        let result =
            unsafe { ffi::hipDeviceCanAccessPeer(&mut accessible, device as c_int, peer as c_int) };
        result == ffi::HIP_SUCCESS && accessible != 0
    }

    fn enable_peer_access(&self, peer_device: usize) -> Result<()> {
        let result = unsafe { ffi::hipDeviceEnablePeerAccess(peer_device as c_int, 0) };
        if result == ffi::HIP_ERROR_PEER_ACCESS_ALREADY_ENABLED {
            return Ok(());
        }
        check(result)
    }

    fn disable_peer_access(&self, peer_device: usize) -> Result<()> {
        unsafe { check(ffi::hipDeviceDisablePeerAccess(peer_device as c_int)) }
    }
}
