//! CUDA backend
//!
//! Realizes [`NativeDriver`] over the CUDA driver API through cudarc,
//! which loads `libcuda` at runtime: the crate builds without a CUDA
//! toolkit, and a missing driver surfaces as an unavailable backend
//! rather than a link failure.
//!
//! # Thread Safety
//!
//! Contexts are device primary contexts, retained once per device and
//! made current on the thread that created the accelerator. Operations
//! must be driven from that thread or after making the context current,
//! matching the cudarc `bind_to_thread` contract.

mod props;

pub use props::query_device_properties;

use super::{Backend, CopyKind, NativeDriver};
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use cudarc::driver::sys;
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Retained primary contexts: context handle -> device ordinal, so release
/// can find the owning device.
static CONTEXTS: OnceLock<Mutex<HashMap<u64, i32>>> = OnceLock::new();

fn lock_contexts() -> MutexGuard<'static, HashMap<u64, i32>> {
    CONTEXTS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn code_of(result: sys::CUresult) -> i32 {
    result as i32
}

fn check(result: sys::CUresult) -> Result<()> {
    if result == sys::CUresult::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(Error::native(Backend::Cuda, code_of(result)))
    }
}

/// Check if the CUDA context on the current thread is valid.
#[inline]
unsafe fn is_cuda_context_valid() -> bool {
    let mut ctx: sys::CUcontext = std::ptr::null_mut();
    // SAFETY: cuCtxGetCurrent is safe to call at any time and writes to
    // the provided pointer.
    let result = unsafe { sys::cuCtxGetCurrent(&mut ctx) };
    result == sys::CUresult::CUDA_SUCCESS && !ctx.is_null()
}

/// Log a CUDA memory operation failure.
#[cold]
#[inline(never)]
fn log_cuda_memory_error(operation: &str, ptr: u64, result: sys::CUresult) {
    tracing::warn!(
        operation,
        ptr = format_args!("0x{ptr:x}"),
        code = code_of(result),
        "CUDA memory operation failed"
    );
}

/// Check if the CUDA driver is usable on this system.
///
/// Loading `libcuda` can panic inside cudarc when the library is absent,
/// so the probe runs behind `catch_unwind` and the answer is cached.
pub fn is_cuda_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        std::panic::catch_unwind(|| unsafe { sys::cuInit(0) == sys::CUresult::CUDA_SUCCESS })
            .unwrap_or(false)
    })
}

/// CUDA driver adapter.
#[derive(Debug, Clone, Default)]
pub struct CudaDriver;

impl CudaDriver {
    /// Create the CUDA driver adapter
    pub fn new() -> Self {
        Self
    }
}

impl NativeDriver for CudaDriver {
    fn backend(&self) -> Backend {
        Backend::Cuda
    }

    fn is_available(&self) -> bool {
        is_cuda_available()
    }

    fn init(&self) -> Result<()> {
        if !is_cuda_available() {
            return Err(Error::native(Backend::Cuda, 100));
        }
        unsafe { check(sys::cuInit(0)) }
    }

    fn device_count(&self) -> usize {
        if !is_cuda_available() {
            return 0;
        }
        let mut count: i32 = 0;
        let result = unsafe { sys::cuDeviceGetCount(&mut count) };
        if result != sys::CUresult::CUDA_SUCCESS {
            return 0;
        }
        count.max(0) as usize
    }

    fn device_properties(&self, index: usize) -> Option<DeviceDescriptor> {
        query_device_properties(index)
    }

    fn set_device(&self, index: usize) -> Result<()> {
        let count = self.device_count();
        if index >= count {
            return Err(Error::DeviceOutOfRange {
                backend: Backend::Cuda,
                index,
                count,
            });
        }
        Ok(())
    }

    fn create_context(&self, index: usize) -> Result<u64> {
        self.set_device(index)?;
        unsafe {
            let mut dev: sys::CUdevice = 0;
            check(sys::cuDeviceGet(&mut dev, index as i32))?;
            let mut ctx: sys::CUcontext = std::ptr::null_mut();
            check(sys::cuDevicePrimaryCtxRetain(&mut ctx, dev))?;
            check(sys::cuCtxSetCurrent(ctx))?;
            let handle = ctx as u64;
            lock_contexts().insert(handle, dev);
            Ok(handle)
        }
    }

    fn destroy_context(&self, ctx: u64) -> Result<()> {
        let Some(dev) = lock_contexts().remove(&ctx) else {
            return Ok(());
        };
        unsafe { check(sys::cuDevicePrimaryCtxRelease_v2(dev)) }
    }

    fn malloc(&self, bytes: usize) -> Result<u64> {
        if bytes == 0 {
            return Ok(0);
        }
        unsafe {
            let mut ptr: u64 = 0;
            let result = sys::cuMemAlloc_v2(&mut ptr, bytes);
            if result != sys::CUresult::CUDA_SUCCESS {
                return Err(Error::native(Backend::Cuda, code_of(result)));
            }
            Ok(ptr)
        }
    }

    fn free(&self, ptr: u64, _bytes: usize) -> Result<()> {
        if ptr == 0 {
            return Ok(());
        }
        unsafe {
            // Context may already be gone during process teardown; the
            // driver reclaims the memory with it.
            if !is_cuda_context_valid() {
                return Ok(());
            }
            let result = sys::cuMemFree_v2(ptr);
            if result != sys::CUresult::CUDA_SUCCESS
                && result != sys::CUresult::CUDA_ERROR_ILLEGAL_ADDRESS
            {
                log_cuda_memory_error("cuMemFree", ptr, result);
                return Err(Error::native(Backend::Cuda, code_of(result)));
            }
        }
        Ok(())
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
        unsafe {
            let result = match (kind, stream) {
                (CopyKind::HostToDevice, None) => {
                    sys::cuMemcpyHtoD_v2(dst, src as *const c_void, bytes)
                }
                (CopyKind::HostToDevice, Some(s)) => {
                    sys::cuMemcpyHtoDAsync_v2(dst, src as *const c_void, bytes, s as sys::CUstream)
                }
                (CopyKind::DeviceToHost, None) => {
                    sys::cuMemcpyDtoH_v2(dst as *mut c_void, src, bytes)
                }
                (CopyKind::DeviceToHost, Some(s)) => {
                    sys::cuMemcpyDtoHAsync_v2(dst as *mut c_void, src, bytes, s as sys::CUstream)
                }
                (CopyKind::DeviceToDevice, None) => sys::cuMemcpyDtoD_v2(dst, src, bytes),
                (CopyKind::DeviceToDevice, Some(s)) => {
                    sys::cuMemcpyDtoDAsync_v2(dst, src, bytes, s as sys::CUstream)
                }
                (CopyKind::HostToHost, _) => {
                    std::ptr::copy(src as *const u8, dst as *mut u8, bytes);
                    sys::CUresult::CUDA_SUCCESS
                }
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
                None => sys::cuMemsetD8_v2(ptr, value, bytes),
                Some(s) => sys::cuMemsetD8Async(ptr, value, bytes, s as sys::CUstream),
            };
            check(result)
        }
    }

    fn stream_create(&self) -> Result<u64> {
        unsafe {
            let mut stream: sys::CUstream = std::ptr::null_mut();
            check(sys::cuStreamCreate(&mut stream, 0))?;
            Ok(stream as u64)
        }
    }

    fn stream_destroy(&self, stream: u64) -> Result<()> {
        if stream == 0 {
            return Ok(());
        }
        unsafe { check(sys::cuStreamDestroy_v2(stream as sys::CUstream)) }
    }

    fn stream_synchronize(&self, stream: u64) -> Result<()> {
        unsafe { check(sys::cuStreamSynchronize(stream as sys::CUstream)) }
    }

    fn module_load(&self, image: &[u8]) -> Result<u64> {
        if image.is_empty() {
            return Err(Error::invalid_argument("image", "empty module image"));
        }
        unsafe {
            let mut module: sys::CUmodule = std::ptr::null_mut();
            check(sys::cuModuleLoadData(
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
            let mut func: sys::CUfunction = std::ptr::null_mut();
            check(sys::cuModuleGetFunction(
                &mut func,
                module as sys::CUmodule,
                c_name.as_ptr(),
            ))?;
            Ok(func as u64)
        }
    }

    fn module_unload(&self, module: u64) -> Result<()> {
        if module == 0 {
            return Ok(());
        }
        unsafe { check(sys::cuModuleUnload(module as sys::CUmodule)) }
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
            check(sys::cuLaunchKernel(
                func as sys::CUfunction,
                grid[0],
                grid[1],
                grid[2],
                group[0],
                group[1],
                group[2],
                shared_mem_bytes,
                stream as sys::CUstream,
                params.as_mut_ptr(),
                std::ptr::null_mut(),
            ))
        }
    }

    fn gemm_f32(
        &self,
        a: u64,
        b: u64,
        c: u64,
        m: usize,
        k: usize,
        n: usize,
        stream: Option<u64>,
    ) -> Result<()> {
        gemm::sgemm(a, b, c, m, k, n, stream)
    }

    fn can_access_peer(&self, device: usize, peer: usize) -> bool {
        unsafe {
            let mut dev: sys::CUdevice = 0;
            let mut peer_dev: sys::CUdevice = 0;
            if sys::cuDeviceGet(&mut dev, device as i32) != sys::CUresult::CUDA_SUCCESS
                || sys::cuDeviceGet(&mut peer_dev, peer as i32) != sys::CUresult::CUDA_SUCCESS
            {
                return false;
            }
            let mut accessible: i32 = 0;
            let result = sys::cuDeviceCanAccessPeer(&mut accessible, dev, peer_dev);
            result == sys::CUresult::CUDA_SUCCESS && accessible != 0
        }
    }

    fn enable_peer_access(&self, peer_device: usize) -> Result<()> {
        unsafe {
            let mut dev: sys::CUdevice = 0;
            check(sys::cuDeviceGet(&mut dev, peer_device as i32))?;
            let mut peer_ctx: sys::CUcontext = std::ptr::null_mut();
            check(sys::cuDevicePrimaryCtxRetain(&mut peer_ctx, dev))?;
            let result = sys::cuCtxEnablePeerAccess(peer_ctx, 0);
            // Drop the temporary refcount either way; the peer's own
            // accelerator keeps its primary context retained.
            let release = sys::cuDevicePrimaryCtxRelease_v2(dev);
            // Already-enabled is idempotent success at this layer.
            if result != sys::CUresult::CUDA_ERROR_PEER_ACCESS_ALREADY_ENABLED {
                check(result)?;
            }
            check(release)
        }
    }

    fn disable_peer_access(&self, peer_device: usize) -> Result<()> {
        unsafe {
            let mut dev: sys::CUdevice = 0;
            check(sys::cuDeviceGet(&mut dev, peer_device as i32))?;
            let mut peer_ctx: sys::CUcontext = std::ptr::null_mut();
            check(sys::cuDevicePrimaryCtxRetain(&mut peer_ctx, dev))?;
            let result = sys::cuCtxDisablePeerAccess(peer_ctx);
            let release = sys::cuDevicePrimaryCtxRelease_v2(dev);
            check(result)?;
            check(release)
        }
    }
}

mod gemm {
    //! cuBLAS single-call GEMM boundary.

    use super::*;
    use cudarc::cublas::sys as blas;

    /// Process-wide cuBLAS handle, created on first use.
    static HANDLE: OnceLock<Mutex<u64>> = OnceLock::new();

    /// cuBLAS statuses live in their own numbering, distinct from the
    /// driver error table, so they get their own message map.
    fn describe_status(code: i32) -> String {
        let known = match code {
            0 => Some("success"),
            1 => Some("library not initialized"),
            3 => Some("resource allocation failed"),
            7 => Some("invalid value"),
            8 => Some("architecture mismatch"),
            11 => Some("memory mapping error"),
            13 => Some("execution failed"),
            14 => Some("internal error"),
            15 => Some("operation not supported"),
            16 => Some("license error"),
            _ => None,
        };
        match known {
            Some(msg) => format!("cuBLAS: {msg}"),
            None => format!("cuBLAS: unknown status {code}"),
        }
    }

    fn check_blas(status: blas::cublasStatus_t) -> Result<()> {
        if status == blas::cublasStatus_t::CUBLAS_STATUS_SUCCESS {
            Ok(())
        } else {
            let code = status as i32;
            Err(Error::Native {
                backend: Backend::Cuda,
                code,
                message: describe_status(code),
            })
        }
    }

    fn handle() -> Result<u64> {
        let cell = HANDLE.get_or_init(|| Mutex::new(0));
        let mut guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard == 0 {
            unsafe {
                let mut raw: blas::cublasHandle_t = std::ptr::null_mut();
                check_blas(blas::cublasCreate_v2(&mut raw))?;
                *guard = raw as u64;
            }
        }
        Ok(*guard)
    }

    /// Row-major `c = a * b` expressed through column-major cuBLAS by
    /// computing `c^T = b^T * a^T`.
    pub(super) fn sgemm(
        a: u64,
        b: u64,
        c: u64,
        m: usize,
        k: usize,
        n: usize,
        stream: Option<u64>,
    ) -> Result<()> {
        let handle = handle()? as blas::cublasHandle_t;
        let alpha: f32 = 1.0;
        let beta: f32 = 0.0;
        unsafe {
            // The handle is process-wide: bind the stream on every call,
            // null stream included, so no call inherits a stale binding.
            check_blas(blas::cublasSetStream_v2(handle, stream.unwrap_or(0) as _))?;
            check_blas(blas::cublasSgemm_v2(
                handle,
                blas::cublasOperation_t::CUBLAS_OP_N,
                blas::cublasOperation_t::CUBLAS_OP_N,
                n as i32,
                m as i32,
                k as i32,
                &alpha,
                b as *const f32,
                n as i32,
                a as *const f32,
                k as i32,
                &beta,
                c as *mut f32,
                n as i32,
            ))
        }
    }
}
