//! Host CPU backend
//!
//! Always present. Models the driverless environment: allocations land in
//! host memory (buffers report `is_native_allocation = false`), modules
//! never load, and kernel launches are simulated by the layer above. This
//! keeps one uniform degradation story for machines without a vendor driver.

use super::{Backend, CopyKind, NativeDriver};
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ffi::c_void;

/// Alignment for host allocations, sized for AVX-512 loads.
const HOST_ALIGN: usize = 64;

/// Allocate zeroed, 64-byte-aligned host memory.
///
/// Returns the pointer as a `u64` handle; zero-size requests return the
/// null sentinel without touching the allocator.
pub(crate) fn host_alloc(bytes: usize) -> Result<u64> {
    if bytes == 0 {
        return Ok(0);
    }
    let layout = Layout::from_size_align(bytes, HOST_ALIGN)
        .map_err(|e| Error::invalid_argument("bytes", e.to_string()))?;
    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(Error::OutOfMemory { size: bytes });
    }
    Ok(ptr as u64)
}

/// Free memory obtained from [`host_alloc`].
pub(crate) fn host_free(ptr: u64, bytes: usize) {
    if ptr == 0 || bytes == 0 {
        return;
    }
    // Size/align match host_alloc, so the layout reconstructs exactly.
    let layout = match Layout::from_size_align(bytes, HOST_ALIGN) {
        Ok(layout) => layout,
        Err(_) => return,
    };
    unsafe {
        dealloc(ptr as *mut u8, layout);
    }
}

/// Host CPU driver.
#[derive(Debug, Clone, Default)]
pub struct CpuDriver;

impl CpuDriver {
    /// Create the host driver
    pub fn new() -> Self {
        Self
    }
}

impl NativeDriver for CpuDriver {
    fn backend(&self) -> Backend {
        Backend::Cpu
    }

    fn is_available(&self) -> bool {
        true
    }

    fn is_simulated(&self) -> bool {
        // Host execution never runs device kernels.
        true
    }

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn device_count(&self) -> usize {
        1
    }

    fn device_properties(&self, index: usize) -> Option<DeviceDescriptor> {
        (index == 0).then(DeviceDescriptor::host)
    }

    fn set_device(&self, index: usize) -> Result<()> {
        if index != 0 {
            return Err(Error::DeviceOutOfRange {
                backend: Backend::Cpu,
                index,
                count: 1,
            });
        }
        Ok(())
    }

    fn create_context(&self, index: usize) -> Result<u64> {
        self.set_device(index)?;
        Ok(0)
    }

    fn destroy_context(&self, _ctx: u64) -> Result<()> {
        Ok(())
    }

    fn malloc(&self, bytes: usize) -> Result<u64> {
        host_alloc(bytes)
    }

    fn free(&self, ptr: u64, bytes: usize) -> Result<()> {
        host_free(ptr, bytes);
        Ok(())
    }

    fn memcpy(
        &self,
        dst: u64,
        src: u64,
        bytes: usize,
        kind: CopyKind,
        _stream: Option<u64>,
    ) -> Result<()> {
        if bytes == 0 || dst == 0 || src == 0 {
            return Ok(());
        }
        if !kind.is_host_only() {
            return Err(Error::Unsupported {
                backend: Backend::Cpu,
                op: "device memory copy",
            });
        }
        unsafe {
            // ptr::copy, not copy_nonoverlapping: ranges inside one buffer
            // may overlap.
            std::ptr::copy(src as *const u8, dst as *mut u8, bytes);
        }
        Ok(())
    }

    fn memset(&self, ptr: u64, value: u8, bytes: usize, _stream: Option<u64>) -> Result<()> {
        if bytes == 0 || ptr == 0 {
            return Ok(());
        }
        unsafe {
            std::ptr::write_bytes(ptr as *mut u8, value, bytes);
        }
        Ok(())
    }

    fn stream_create(&self) -> Result<u64> {
        // Host execution is synchronous; the null stream is sufficient.
        Ok(0)
    }

    fn stream_destroy(&self, _stream: u64) -> Result<()> {
        Ok(())
    }

    fn stream_synchronize(&self, _stream: u64) -> Result<()> {
        Ok(())
    }

    fn module_load(&self, _image: &[u8]) -> Result<u64> {
        Err(Error::Unsupported {
            backend: Backend::Cpu,
            op: "module loading",
        })
    }

    fn module_get_function(&self, _module: u64, _name: &str) -> Result<u64> {
        Err(Error::Unsupported {
            backend: Backend::Cpu,
            op: "module loading",
        })
    }

    fn module_unload(&self, _module: u64) -> Result<()> {
        Ok(())
    }

    fn launch_kernel(
        &self,
        _func: u64,
        _grid: [u32; 3],
        _group: [u32; 3],
        _shared_mem_bytes: u32,
        _stream: u64,
        _params: &mut [*mut c_void],
    ) -> Result<()> {
        Err(Error::Unsupported {
            backend: Backend::Cpu,
            op: "native kernel launch",
        })
    }

    fn can_access_peer(&self, _device: usize, _peer: usize) -> bool {
        // One shared host address space.
        true
    }

    fn enable_peer_access(&self, _peer_device: usize) -> Result<()> {
        Ok(())
    }

    fn disable_peer_access(&self, _peer_device: usize) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_alloc_roundtrip() {
        let ptr = host_alloc(256).unwrap();
        assert_ne!(ptr, 0);
        assert_eq!(ptr % HOST_ALIGN as u64, 0);
        host_free(ptr, 256);
    }

    #[test]
    fn zero_size_alloc_returns_null_sentinel() {
        assert_eq!(host_alloc(0).unwrap(), 0);
        host_free(0, 0); // must not panic
    }

    #[test]
    fn cpu_driver_is_simulated_but_available() {
        let driver = CpuDriver::new();
        assert!(driver.is_available());
        assert!(driver.is_simulated());
        assert_eq!(driver.device_count(), 1);
        assert!(driver.device_properties(1).is_none());
    }

    #[test]
    fn device_copy_kinds_are_rejected() {
        let driver = CpuDriver::new();
        let a = host_alloc(16).unwrap();
        let b = host_alloc(16).unwrap();
        let err = driver
            .memcpy(b, a, 16, CopyKind::DeviceToHost, None)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
        host_free(a, 16);
        host_free(b, 16);
    }
}
