//! Native backend bindings
//!
//! Each backend exposes the same thin driver surface through the
//! [`NativeDriver`] trait: init, device enumeration, memory, streams,
//! modules, and kernel launch. Higher layers dispatch through
//! `Arc<dyn NativeDriver>` and never match on backend identity except for
//! the peer-access compatibility check.

use crate::device::DeviceDescriptor;
use crate::error::Result;
use std::ffi::c_void;

pub mod cpu;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(feature = "hip")]
pub mod hip;

/// Identity tag for a compute backend.
///
/// Used for error tagging and peer-access compatibility checks only;
/// operational behavior is dispatched through [`NativeDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// NVIDIA CUDA driver API
    Cuda,
    /// AMD ROCm HIP runtime
    Hip,
    /// Host CPU (simulated execution, host memory only)
    Cpu,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Backend::Cuda => "cuda",
            Backend::Hip => "hip",
            Backend::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

/// Direction of a memory copy, derived from where the two endpoints live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    /// Both endpoints in host memory
    HostToHost,
    /// Host source, native device destination
    HostToDevice,
    /// Native device source, host destination
    DeviceToHost,
    /// Both endpoints in native device memory
    DeviceToDevice,
}

impl CopyKind {
    /// Select the copy direction from the `is_native_allocation` flags of
    /// the source and destination endpoints.
    pub fn between(src_native: bool, dst_native: bool) -> Self {
        match (src_native, dst_native) {
            (false, false) => CopyKind::HostToHost,
            (false, true) => CopyKind::HostToDevice,
            (true, false) => CopyKind::DeviceToHost,
            (true, true) => CopyKind::DeviceToDevice,
        }
    }

    /// True when both endpoints are CPU-addressable and the copy may be
    /// performed with a raw host memcpy.
    pub fn is_host_only(self) -> bool {
        self == CopyKind::HostToHost
    }
}

/// Thin per-backend driver surface.
///
/// All handles are `u64` values opaque outside the backend that produced
/// them (device pointers, stream handles, module and function handles).
/// Zero is the universal null sentinel. Every method that can touch the
/// native driver returns a backend-tagged [`crate::error::Error::Native`]
/// on failure.
pub(crate) trait NativeDriver: Send + Sync {
    /// Backend identity tag
    fn backend(&self) -> Backend;

    /// Whether the native driver library is present and initialized.
    ///
    /// Probing must never panic or error when the driver is absent.
    fn is_available(&self) -> bool;

    /// Whether this driver only simulates execution (no native memory, no
    /// loadable kernels). The CPU backend and GPU backends without an
    /// installed driver report true.
    fn is_simulated(&self) -> bool {
        !self.is_available()
    }

    /// Idempotent runtime initialization
    fn init(&self) -> Result<()>;

    /// Number of devices this backend exposes. Zero when unavailable.
    fn device_count(&self) -> usize;

    /// Query device capabilities. `None` when the native query fails;
    /// callers substitute [`DeviceDescriptor::fallback`].
    fn device_properties(&self, index: usize) -> Option<DeviceDescriptor>;

    /// Select the device as current for the calling thread
    fn set_device(&self, index: usize) -> Result<()>;

    /// Open a native context handle on a device
    fn create_context(&self, index: usize) -> Result<u64>;

    /// Release a native context handle
    fn destroy_context(&self, ctx: u64) -> Result<()>;

    /// Allocate device memory
    fn malloc(&self, bytes: usize) -> Result<u64>;

    /// Free device memory
    fn free(&self, ptr: u64, bytes: usize) -> Result<()>;

    /// Copy `bytes` between two endpoints. A `Some(stream)` enqueues the
    /// copy asynchronously; `None` blocks until the copy completes.
    fn memcpy(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        kind: CopyKind,
        stream: Option<u64>,
    ) -> Result<()>;

    /// Fill `bytes` at `ptr` with `value`
    fn memset(&self, ptr: u64, value: u8, bytes: usize, stream: Option<u64>) -> Result<()>;

    /// Create an asynchronous stream
    fn stream_create(&self) -> Result<u64>;

    /// Destroy a stream
    fn stream_destroy(&self, stream: u64) -> Result<()>;

    /// Block until all work enqueued on `stream` has retired
    fn stream_synchronize(&self, stream: u64) -> Result<()>;

    /// Load a compiled module image
    fn module_load(&self, image: &[u8]) -> Result<u64>;

    /// Resolve an entry point inside a loaded module
    fn module_get_function(&self, module: u64, name: &str) -> Result<u64>;

    /// Unload a module
    fn module_unload(&self, module: u64) -> Result<()>;

    /// Launch a kernel function. `params` follows the driver `void**`
    /// convention: one pointer per kernel parameter value.
    #[allow(clippy::too_many_arguments)]
    fn launch_kernel(
        &self,
        func: u64,
        grid: [u32; 3],
        group: [u32; 3],
        shared_mem_bytes: u32,
        stream: u64,
        params: &mut [*mut c_void],
    ) -> Result<()>;

    /// Vendor GEMM over f32 device pointers: `c = a * b` for row-major
    /// `m x k` and `k x n` operands. Backends without a vendor math
    /// library report `Unsupported` and callers stage through the host.
    #[allow(clippy::too_many_arguments)]
    fn gemm_f32(
        &self,
        _a: u64,
        _b: u64,
        _c: u64,
        _m: usize,
        _k: usize,
        _n: usize,
        _stream: Option<u64>,
    ) -> Result<()> {
        Err(crate::error::Error::Unsupported {
            backend: self.backend(),
            op: "vendor GEMM",
        })
    }

    /// Whether `device` can map memory of `peer` directly
    fn can_access_peer(&self, device: usize, peer: usize) -> bool;

    /// Enable peer access from the current context to `peer_device`
    fn enable_peer_access(&self, peer_device: usize) -> Result<()>;

    /// Disable peer access from the current context to `peer_device`
    fn disable_peer_access(&self, peer_device: usize) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_kind_follows_endpoint_flags() {
        assert_eq!(CopyKind::between(false, false), CopyKind::HostToHost);
        assert_eq!(CopyKind::between(false, true), CopyKind::HostToDevice);
        assert_eq!(CopyKind::between(true, false), CopyKind::DeviceToHost);
        assert_eq!(CopyKind::between(true, true), CopyKind::DeviceToDevice);
        assert!(CopyKind::HostToHost.is_host_only());
        assert!(!CopyKind::DeviceToHost.is_host_only());
    }
}
