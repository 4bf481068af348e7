//! Memory buffers with native-then-host fallback allocation
//!
//! A [`MemoryBuffer`] owns a region of device-or-host memory for one
//! accelerator. Allocation attempts the native device path first and falls
//! back to host memory when the driver is absent or the native call fails;
//! all subsequent operations branch on [`MemoryBuffer::is_native_allocation`]
//! to pick the correct primitive but present one external contract.

use crate::accelerator::AcceleratorInner;
use crate::backends::{cpu, CopyKind};
use crate::error::{Error, Result};
use crate::stream::Stream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Raw byte buffer bound to one accelerator for its whole lifetime.
///
/// No buffer migration: moving data to another accelerator is modeled as a
/// copy into a buffer allocated there.
pub struct MemoryBuffer {
    accel: Arc<AcceleratorInner>,
    len: usize,
    elem_size: usize,
    ptr: AtomicU64,
    is_native: bool,
    disposed: AtomicBool,
}

impl std::fmt::Debug for MemoryBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBuffer")
            .field("len", &self.len)
            .field("elem_size", &self.elem_size)
            .field("is_native", &self.is_native)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl MemoryBuffer {
    /// Allocate `len` elements of `elem_size` bytes on `accel`.
    pub(crate) fn allocate(
        accel: Arc<AcceleratorInner>,
        len: usize,
        elem_size: usize,
    ) -> Result<Self> {
        if len == 0 {
            return Err(Error::invalid_argument("len", "must be greater than zero"));
        }
        if elem_size == 0 {
            return Err(Error::invalid_argument(
                "elem_size",
                "must be greater than zero",
            ));
        }
        let bytes = len
            .checked_mul(elem_size)
            .ok_or_else(|| Error::invalid_argument("len", "len * elem_size overflows usize"))?;

        let (ptr, is_native) = if accel.simulated {
            (cpu::host_alloc(bytes)?, false)
        } else {
            match accel.driver.malloc(bytes) {
                Ok(ptr) => (ptr, true),
                Err(e) => {
                    tracing::warn!(
                        backend = %accel.driver.backend(),
                        bytes,
                        error = %e,
                        "native allocation failed, falling back to host memory"
                    );
                    (cpu::host_alloc(bytes)?, false)
                }
            }
        };

        Ok(Self {
            accel,
            len,
            elem_size,
            ptr: AtomicU64::new(ptr),
            is_native,
            disposed: AtomicBool::new(false),
        })
    }

    /// Logical element count
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: zero-length buffers cannot be allocated
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Size of one element in bytes
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    /// Total size in bytes (`len * elem_size`)
    pub fn len_in_bytes(&self) -> usize {
        self.len * self.elem_size
    }

    /// Whether the backing memory is a native device allocation.
    ///
    /// False means the buffer lives in host memory because the native
    /// driver was unavailable or the native allocation failed.
    pub fn is_native_allocation(&self) -> bool {
        self.is_native
    }

    /// Whether [`MemoryBuffer::dispose`] has run
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub(crate) fn raw_ptr(&self) -> u64 {
        self.ptr.load(Ordering::Acquire)
    }

    pub(crate) fn driver(&self) -> &dyn crate::backends::NativeDriver {
        &*self.accel.driver
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed("memory buffer"));
        }
        self.accel.ensure_ready()
    }

    fn check_range(&self, arg: &'static str, offset: usize, bytes: usize) -> Result<()> {
        let end = offset
            .checked_add(bytes)
            .ok_or_else(|| Error::invalid_argument(arg, "range overflows usize"))?;
        if end > self.len_in_bytes() {
            return Err(Error::invalid_argument(
                arg,
                format!(
                    "range {offset}..{end} exceeds buffer size {}",
                    self.len_in_bytes()
                ),
            ));
        }
        Ok(())
    }

    /// Copy `data` into the buffer starting at byte `offset`.
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        self.check_range("offset", offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let dst = self.raw_ptr() + offset as u64;
        if self.is_native {
            self.accel.driver.memcpy(
                dst,
                data.as_ptr() as u64,
                data.len(),
                CopyKind::HostToDevice,
                None,
            )
        } else {
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, data.len());
            }
            Ok(())
        }
    }

    /// Copy `out.len()` bytes out of the buffer starting at byte `offset`.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.ensure_ready()?;
        self.check_range("offset", offset, out.len())?;
        if out.is_empty() {
            return Ok(());
        }
        let src = self.raw_ptr() + offset as u64;
        if self.is_native {
            self.accel.driver.memcpy(
                out.as_mut_ptr() as u64,
                src,
                out.len(),
                CopyKind::DeviceToHost,
                None,
            )
        } else {
            unsafe {
                std::ptr::copy_nonoverlapping(src as *const u8, out.as_mut_ptr(), out.len());
            }
            Ok(())
        }
    }

    /// Fill `bytes` bytes starting at `offset` with `value`.
    ///
    /// With `Some(stream)` on a native buffer the fill is enqueued
    /// asynchronously; otherwise it completes before returning.
    pub fn fill(
        &self,
        value: u8,
        offset: usize,
        bytes: usize,
        stream: Option<&Stream>,
    ) -> Result<()> {
        self.ensure_ready()?;
        self.check_range("offset", offset, bytes)?;
        if bytes == 0 {
            return Ok(());
        }
        let dst = self.raw_ptr() + offset as u64;
        if self.is_native {
            let handle = stream.map(|s| s.raw_handle()).transpose()?;
            self.accel.driver.memset(dst, value, bytes, handle)
        } else {
            unsafe {
                std::ptr::write_bytes(dst as *mut u8, value, bytes);
            }
            Ok(())
        }
    }

    /// Copy `bytes` bytes from `src` into this buffer.
    ///
    /// The copy direction is selected from the `is_native_allocation`
    /// flags of the two endpoints, never assumed. When both endpoints are
    /// host-backed the copy is a raw host memcpy (both pointers are
    /// CPU-addressable by construction); native directions go through the
    /// driver and, with `Some(stream)`, are enqueued asynchronously.
    ///
    /// Endpoints on different accelerators are rejected unless both are
    /// host-backed or peer access to the source device has been enabled.
    pub fn copy_from(
        &self,
        src: &MemoryBuffer,
        src_offset: usize,
        dst_offset: usize,
        bytes: usize,
        stream: Option<&Stream>,
    ) -> Result<()> {
        self.ensure_ready()?;
        src.ensure_ready()?;
        src.check_range("src_offset", src_offset, bytes)?;
        self.check_range("dst_offset", dst_offset, bytes)?;
        if bytes == 0 {
            return Ok(());
        }

        let kind = CopyKind::between(src.is_native, self.is_native);
        let same_accel = Arc::ptr_eq(&self.accel, &src.accel);
        if !same_accel && !kind.is_host_only() && !self.accel.has_peer(src.accel.device.index) {
            return Err(Error::invalid_argument(
                "src",
                "cross-accelerator copy requires host staging or enabled peer access",
            ));
        }

        let src_ptr = src.raw_ptr() + src_offset as u64;
        let dst_ptr = self.raw_ptr() + dst_offset as u64;

        if kind.is_host_only() {
            unsafe {
                // Ranges inside one buffer may overlap.
                std::ptr::copy(src_ptr as *const u8, dst_ptr as *mut u8, bytes);
            }
            return Ok(());
        }

        let handle = stream.map(|s| s.raw_handle()).transpose()?;
        // A raw memcpy fallback is only sound for CPU-addressable pointers,
        // which this direction does not have: propagate the driver error.
        self.accel.driver.memcpy(dst_ptr, src_ptr, bytes, kind, handle)
    }

    /// View a host-backed buffer as a byte slice.
    ///
    /// Returns `None` for native device allocations and disposed buffers;
    /// device pointers are never treated as CPU-addressable.
    pub fn as_host_slice(&self) -> Option<&[u8]> {
        if self.is_native || self.is_disposed() {
            return None;
        }
        let ptr = self.raw_ptr();
        if ptr == 0 {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(ptr as *const u8, self.len_in_bytes()) })
    }

    /// Mutable host view, same constraints as [`MemoryBuffer::as_host_slice`]
    pub fn as_host_slice_mut(&mut self) -> Option<&mut [u8]> {
        if self.is_native || self.is_disposed() {
            return None;
        }
        let ptr = self.raw_ptr();
        if ptr == 0 {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut u8, self.len_in_bytes()) })
    }

    /// Release the backing memory.
    ///
    /// Idempotent and infallible: a native free failure is logged and
    /// swallowed so cleanup never masks an earlier error. The pointer is
    /// cleared; any further access fails with a disposed error.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let ptr = self.ptr.swap(0, Ordering::AcqRel);
        if ptr == 0 {
            return;
        }
        if self.is_native {
            if let Err(e) = self.accel.driver.free(ptr, self.len_in_bytes()) {
                tracing::warn!(
                    backend = %self.accel.driver.backend(),
                    ptr = format_args!("0x{ptr:x}"),
                    error = %e,
                    "native free failed"
                );
            }
        } else {
            cpu::host_free(ptr, self.len_in_bytes());
        }
    }
}

impl Drop for MemoryBuffer {
    fn drop(&mut self) {
        self.dispose();
    }
}
