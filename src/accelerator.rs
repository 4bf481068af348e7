//! Accelerator: the central resource owner
//!
//! An [`Accelerator`] owns a native compute context for one device, the
//! default stream, and is the unit of resource lifetime. Buffers, kernels,
//! and streams hold a reference to the accelerator's shared state, so the
//! native context is torn down strictly after every dependent resource.
//!
//! # Thread Safety
//!
//! `Accelerator` is `Clone` and can be shared across threads; internal state
//! is reference-counted. Two threads driving two *different* streams of one
//! accelerator need no external locking. Two threads mutating the same
//! buffer or the same stream concurrently is undefined behavior unless the
//! native backend guarantees thread-safe enqueue.

use crate::backends::{Backend, NativeDriver};
use crate::buffer::MemoryBuffer;
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use crate::kernel::{CompiledKernel, Kernel};
use crate::stream::Stream;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared accelerator state.
///
/// Dependent resources (buffers, kernels, streams) hold an `Arc` to this
/// struct; `Drop` therefore runs only after all of them are gone, which
/// gives reverse-dependency native teardown without manual sequencing.
pub(crate) struct AcceleratorInner {
    pub(crate) driver: Arc<dyn NativeDriver>,
    pub(crate) device: DeviceDescriptor,
    pub(crate) context: u64,
    pub(crate) default_stream: u64,
    pub(crate) simulated: bool,
    disposed: AtomicBool,
    peers: Mutex<HashSet<usize>>,
}

impl AcceleratorInner {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Fail with a disposed error unless the accelerator is still ready.
    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed("accelerator"));
        }
        Ok(())
    }

    fn lock_peers(&self) -> MutexGuard<'_, HashSet<usize>> {
        // Peer bookkeeping is idempotent, so a poisoned lock is recoverable.
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether peer access to `device_index` has been enabled.
    pub(crate) fn has_peer(&self, device_index: usize) -> bool {
        self.lock_peers().contains(&device_index)
    }
}

impl Drop for AcceleratorInner {
    fn drop(&mut self) {
        // In-flight work must retire before native handles go away.
        if let Err(e) = self.driver.stream_synchronize(self.default_stream) {
            tracing::warn!(backend = %self.driver.backend(), error = %e, "synchronize during teardown failed");
        }
        if let Err(e) = self.driver.stream_destroy(self.default_stream) {
            tracing::warn!(backend = %self.driver.backend(), error = %e, "default stream destroy failed");
        }
        if let Err(e) = self.driver.destroy_context(self.context) {
            tracing::warn!(backend = %self.driver.backend(), error = %e, "context destroy failed");
        }
    }
}

/// Runtime object owning a native compute context for one device.
///
/// Created through [`crate::context::Context::create_accelerator`]. All
/// operations except disposal fail with [`Error::Disposed`] once
/// [`Accelerator::dispose`] has run.
#[derive(Clone)]
pub struct Accelerator {
    inner: Arc<AcceleratorInner>,
}

impl std::fmt::Debug for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accelerator")
            .field("device", &self.inner.device.name)
            .field("backend", &self.inner.device.backend)
            .field("simulated", &self.inner.simulated)
            .field("disposed", &self.inner.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Accelerator {
    /// Initialize the backend runtime, select the device, open a native
    /// context, and create the default stream.
    ///
    /// Context creation failure is fatal for native backends; there is no
    /// fake GPU context. The degraded path is the CPU device instead.
    pub(crate) fn new(driver: Arc<dyn NativeDriver>, device: DeviceDescriptor) -> Result<Self> {
        driver.init()?;
        driver.set_device(device.index)?;
        let context = driver.create_context(device.index)?;
        let default_stream = match driver.stream_create() {
            Ok(stream) => stream,
            Err(e) => {
                let _ = driver.destroy_context(context);
                return Err(e);
            }
        };
        let simulated = driver.is_simulated();
        Ok(Self {
            inner: Arc::new(AcceleratorInner {
                driver,
                device,
                context,
                default_stream,
                simulated,
                disposed: AtomicBool::new(false),
                peers: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Backend identity of this accelerator
    pub fn backend(&self) -> Backend {
        self.inner.device.backend
    }

    /// Capability descriptor of the underlying device
    pub fn device(&self) -> &DeviceDescriptor {
        &self.inner.device
    }

    /// Whether this accelerator only simulates execution.
    ///
    /// True on the CPU backend and on GPU backends without an installed
    /// driver. In simulated mode buffers are host-backed and kernel
    /// launches are no-ops; `launch` success does not imply computation
    /// occurred.
    pub fn is_simulated(&self) -> bool {
        self.inner.simulated
    }

    /// Whether [`Accelerator::dispose`] has been called
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Allocate a raw memory buffer of `len` elements of `elem_size` bytes.
    ///
    /// Attempts native device allocation first; when the driver is absent
    /// or the native call fails, falls back to host memory and marks the
    /// buffer with `is_native_allocation() == false`.
    pub fn allocate_raw(&self, len: usize, elem_size: usize) -> Result<MemoryBuffer> {
        self.inner.ensure_ready()?;
        MemoryBuffer::allocate(Arc::clone(&self.inner), len, elem_size)
    }

    /// Load a compiled kernel artifact.
    ///
    /// On a simulated accelerator, or when the native load fails with a
    /// driver-level error, returns a kernel with `is_loaded() == false`
    /// whose launches simulate instead of crashing.
    pub fn load_kernel(&self, compiled: &CompiledKernel) -> Result<Kernel> {
        self.inner.ensure_ready()?;
        Kernel::load(Arc::clone(&self.inner), compiled)
    }

    /// Create a new asynchronous stream on this accelerator
    pub fn create_stream(&self) -> Result<Stream> {
        self.inner.ensure_ready()?;
        let handle = self.inner.driver.stream_create()?;
        Ok(Stream::new(Arc::clone(&self.inner), handle, true))
    }

    /// Borrowless view of the default stream created at construction
    pub fn default_stream(&self) -> Stream {
        Stream::new(Arc::clone(&self.inner), self.inner.default_stream, false)
    }

    /// Block until all operations enqueued on the default stream have
    /// completed. Safe to call repeatedly.
    pub fn synchronize(&self) -> Result<()> {
        self.inner.ensure_ready()?;
        self.inner
            .driver
            .stream_synchronize(self.inner.default_stream)
    }

    /// Whether this accelerator can access `other`'s memory directly.
    ///
    /// Cross-backend access is never possible. The same-backend answer
    /// comes from the native driver; on simulated accelerators it is a
    /// placeholder `true` pending a real topology query.
    pub fn can_access_peer(&self, other: &Accelerator) -> bool {
        if self.is_disposed() || other.is_disposed() {
            return false;
        }
        if self.backend() != other.backend() {
            return false;
        }
        self.inner
            .driver
            .can_access_peer(self.inner.device.index, other.inner.device.index)
    }

    /// Enable direct peer access into `other`'s memory.
    ///
    /// Enabling across backend types is an error, never a silent no-op.
    /// Re-enabling an already-enabled peer is accepted.
    pub fn enable_peer_access(&self, other: &Accelerator) -> Result<()> {
        self.inner.ensure_ready()?;
        other.inner.ensure_ready()?;
        if self.backend() != other.backend() {
            return Err(Error::BackendMismatch {
                lhs: self.backend(),
                rhs: other.backend(),
            });
        }
        let peer = other.inner.device.index;
        let mut peers = self.inner.lock_peers();
        if peers.contains(&peer) {
            return Ok(());
        }
        if !self.inner.simulated {
            self.inner.driver.enable_peer_access(peer)?;
        }
        peers.insert(peer);
        Ok(())
    }

    /// Disable previously enabled peer access
    pub fn disable_peer_access(&self, other: &Accelerator) -> Result<()> {
        self.inner.ensure_ready()?;
        if self.backend() != other.backend() {
            return Err(Error::BackendMismatch {
                lhs: self.backend(),
                rhs: other.backend(),
            });
        }
        let peer = other.inner.device.index;
        let mut peers = self.inner.lock_peers();
        if !peers.remove(&peer) {
            return Err(Error::invalid_argument(
                "other",
                format!("peer access to device {peer} is not enabled"),
            ));
        }
        if !self.inner.simulated {
            self.inner.driver.disable_peer_access(peer)?;
        }
        Ok(())
    }

    /// Estimate a launch group size for `kernel`.
    ///
    /// Searches warp-granular sizes from the warp size up to
    /// `max_group_size` (clamped to the device and kernel limits; zero
    /// means "device limit"). A size qualifies when its dynamic shared
    /// memory requirement, given by `shared_mem`, fits the per-group limit
    /// and the estimated active groups per multiprocessor (minimum of the
    /// thread and shared-memory occupancy bounds) is greater than zero.
    ///
    /// Returns `(group_size, min_grid_size)` for the largest qualifying
    /// size, or `(warp_size, multiprocessor_count)` when nothing
    /// qualifies. Never returns zero and never a size over the hardware
    /// limit. Fails with a disposed error once [`Accelerator::dispose`]
    /// has run.
    pub fn estimate_group_size<F>(
        &self,
        kernel: &Kernel,
        shared_mem: F,
        max_group_size: u32,
    ) -> Result<(u32, u32)>
    where
        F: Fn(u32) -> usize,
    {
        self.inner.ensure_ready()?;
        let device = &self.inner.device;
        let warp = device.warp_size.max(1);
        let shared_limit = u64::from(device.max_shared_memory_per_group);

        let mut limit = if max_group_size == 0 {
            device.max_threads_per_group
        } else {
            max_group_size.min(device.max_threads_per_group)
        };
        let hint = kernel.info().max_threads_per_group;
        if hint > 0 {
            limit = limit.min(hint);
        }

        let mut best: Option<(u32, u32)> = None;
        let mut size = warp;
        while size <= limit {
            let shared = shared_mem(size) as u64;
            if shared <= shared_limit {
                let by_threads = device.max_threads_per_multiprocessor / size;
                let by_shared = if shared == 0 {
                    u32::MAX
                } else {
                    (shared_limit / shared).min(u64::from(u32::MAX)) as u32
                };
                let active = by_threads.min(by_shared);
                if active > 0 {
                    best = Some((size, active));
                }
            }
            size += warp;
        }

        Ok(match best {
            Some((size, active)) => (size, device.multiprocessor_count.saturating_mul(active)),
            None => (warp, device.multiprocessor_count),
        })
    }

    /// Dispose the accelerator.
    ///
    /// Synchronizes the default stream, then marks every subsequent
    /// operation as failing with a disposed error. Idempotent; never
    /// returns an error. Native handles are released once the last
    /// dependent resource is gone.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self
            .inner
            .driver
            .stream_synchronize(self.inner.default_stream)
        {
            tracing::warn!(backend = %self.backend(), error = %e, "synchronize during dispose failed");
        }
    }
}
