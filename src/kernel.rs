//! Compiled kernel artifacts and launchable kernels
//!
//! A [`CompiledKernel`] is the opaque artifact an external compiler
//! produces: binary image, entry-point name, and resource-usage metadata.
//! Loading it on an accelerator yields a [`Kernel`] holding native module
//! and function handles. Loading never leaves a half-loaded state: on any
//! failure both handles stay at the null sentinel and `is_loaded()` is
//! false, and launching such a kernel simulates instead of crashing. That
//! simulation is a deliberate portability affordance: launch success on a
//! not-loaded kernel does not imply computation occurred, and callers can
//! observe the mode through `is_loaded()` and
//! [`crate::accelerator::Accelerator::is_simulated`].

use crate::accelerator::AcceleratorInner;
use crate::buffer::MemoryBuffer;
use crate::error::{Error, Result};
use crate::stream::Stream;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Resource-usage metadata attached to a compiled kernel.
///
/// Zero means "unknown" for every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KernelInfo {
    /// Compiler-reported upper bound on threads per group
    pub max_threads_per_group: u32,
    /// Static shared memory usage in bytes
    pub shared_memory_bytes: u32,
    /// Registers per thread
    pub registers_per_thread: u32,
}

/// Opaque compiled-kernel artifact: binary image plus entry point.
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    binary: Vec<u8>,
    entry: String,
    info: KernelInfo,
}

impl CompiledKernel {
    /// Wrap a compiled binary with its entry-point name and metadata
    pub fn new(binary: Vec<u8>, entry: impl Into<String>, info: KernelInfo) -> Self {
        Self {
            binary,
            entry: entry.into(),
            info,
        }
    }

    /// The compiled binary image
    pub fn binary(&self) -> &[u8] {
        &self.binary
    }

    /// Entry-point name inside the binary
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Resource-usage metadata
    pub fn info(&self) -> KernelInfo {
        self.info
    }
}

/// Grid and group dimensions for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Number of groups per grid dimension
    pub grid_dim: [u32; 3],
    /// Number of threads per group dimension
    pub group_dim: [u32; 3],
    /// Dynamic shared memory per group in bytes.
    ///
    /// A hint from group-size estimation, not an enforced ceiling:
    /// exceeding the hardware limit is reported as a native launch
    /// failure, never silently clamped.
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    /// One-dimensional config covering `len` elements with `group_size`
    /// threads per group.
    pub fn for_len(len: usize, group_size: u32) -> Self {
        let group_size = group_size.max(1);
        let grid = (len as u64).div_ceil(u64::from(group_size)).max(1);
        Self {
            grid_dim: [grid.min(u64::from(u32::MAX)) as u32, 1, 1],
            group_dim: [group_size, 1, 1],
            shared_mem_bytes: 0,
        }
    }
}

/// Kernel launch arguments marshalled into the driver `void**` convention.
///
/// Each argument occupies one 8-byte word; the driver reads each value at
/// the size the kernel signature declares.
#[derive(Debug, Default)]
pub struct KernelParams {
    words: Vec<u64>,
}

impl KernelParams {
    /// Empty parameter list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer argument (passed as its device or host pointer)
    pub fn buffer(mut self, buf: &MemoryBuffer) -> Self {
        self.words.push(buf.raw_ptr());
        self
    }

    /// Append a `u32` argument
    pub fn u32(mut self, v: u32) -> Self {
        self.words.push(u64::from(v));
        self
    }

    /// Append an `i32` argument
    pub fn i32(mut self, v: i32) -> Self {
        self.words.push(v as u32 as u64);
        self
    }

    /// Append an `f32` argument
    pub fn f32(mut self, v: f32) -> Self {
        self.words.push(u64::from(v.to_bits()));
        self
    }

    /// Append an `f64` argument
    pub fn f64(mut self, v: f64) -> Self {
        self.words.push(v.to_bits());
        self
    }

    /// Append a `usize` argument
    pub fn usize(mut self, v: usize) -> Self {
        self.words.push(v as u64);
        self
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub(crate) fn as_void_ptrs(&mut self) -> Vec<*mut c_void> {
        self.words
            .iter_mut()
            .map(|w| w as *mut u64 as *mut c_void)
            .collect()
    }
}

/// A loaded, launchable kernel bound to one accelerator.
pub struct Kernel {
    accel: Arc<AcceleratorInner>,
    entry: String,
    info: KernelInfo,
    module: u64,
    func: u64,
    loaded: bool,
    disposed: AtomicBool,
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("entry", &self.entry)
            .field("loaded", &self.loaded)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl Kernel {
    pub(crate) fn load(accel: Arc<AcceleratorInner>, compiled: &CompiledKernel) -> Result<Self> {
        let mut module = 0u64;
        let mut func = 0u64;
        let mut loaded = false;

        if accel.simulated {
            tracing::debug!(
                entry = compiled.entry(),
                "driver unavailable, kernel stays in not-loaded state"
            );
        } else {
            match accel.driver.module_load(compiled.binary()) {
                Ok(m) => match accel.driver.module_get_function(m, compiled.entry()) {
                    Ok(f) if f != 0 => {
                        module = m;
                        func = f;
                        loaded = true;
                    }
                    Ok(_) | Err(_) => {
                        // Never keep a module without a resolved entry
                        // point; unload and fall to the not-loaded state.
                        if let Err(e) = accel.driver.module_unload(m) {
                            tracing::warn!(error = %e, "module unload after failed lookup failed");
                        }
                        tracing::warn!(
                            entry = compiled.entry(),
                            "entry point lookup failed, kernel stays in not-loaded state"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        entry = compiled.entry(),
                        error = %e,
                        "module load failed, kernel stays in not-loaded state"
                    );
                }
            }
        }

        Ok(Self {
            accel,
            entry: compiled.entry().to_string(),
            info: compiled.info(),
            module,
            func,
            loaded,
            disposed: AtomicBool::new(false),
        })
    }

    /// Entry-point name
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Resource-usage metadata from the compiled artifact
    pub fn info(&self) -> KernelInfo {
        self.info
    }

    /// True only when both the module and function handles are valid.
    ///
    /// A not-loaded kernel launches as a simulated no-op.
    pub fn is_loaded(&self) -> bool {
        self.loaded && !self.is_disposed()
    }

    /// Whether [`Kernel::dispose`] has run
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::Disposed("kernel"));
        }
        self.accel.ensure_ready()
    }

    fn validate_config(&self, config: &LaunchConfig) -> Result<()> {
        let device = &self.accel.device;
        for (axis, (&dim, &limit)) in config
            .group_dim
            .iter()
            .zip(device.max_group_dim.iter())
            .enumerate()
        {
            if dim == 0 || dim > limit {
                return Err(Error::LaunchConfig {
                    reason: format!("group dimension {axis} is {dim}, device limit is 1..={limit}"),
                });
            }
        }
        for (axis, (&dim, &limit)) in config
            .grid_dim
            .iter()
            .zip(device.max_grid_dim.iter())
            .enumerate()
        {
            if dim == 0 || dim > limit {
                return Err(Error::LaunchConfig {
                    reason: format!("grid dimension {axis} is {dim}, device limit is 1..={limit}"),
                });
            }
        }
        let threads = config.group_dim.iter().map(|&d| u64::from(d)).product::<u64>();
        if threads > u64::from(device.max_threads_per_group) {
            return Err(Error::LaunchConfig {
                reason: format!(
                    "group has {threads} threads, device limit is {}",
                    device.max_threads_per_group
                ),
            });
        }
        Ok(())
    }

    /// Launch the kernel.
    ///
    /// `stream` defaults to the accelerator's default stream. Group and
    /// grid dimensions are validated against the device limits (misuse is
    /// a typed error, never clamped). If the kernel is not loaded the
    /// launch degrades to a no-op with a short simulated delay; buffer
    /// contents are then left untouched.
    pub fn launch(
        &self,
        config: LaunchConfig,
        stream: Option<&Stream>,
        mut params: KernelParams,
    ) -> Result<()> {
        self.ensure_ready()?;
        self.validate_config(&config)?;

        // Resolve the stream before the simulation short-circuit: a
        // disposed stream is rejected in both modes.
        let stream_handle = match stream {
            Some(s) => s.raw_handle()?,
            None => self.accel.default_stream,
        };

        if !self.loaded {
            tracing::debug!(entry = %self.entry, "simulating launch of not-loaded kernel");
            std::thread::sleep(Duration::from_millis(1));
            return Ok(());
        }
        let mut ptrs = params.as_void_ptrs();
        self.accel.driver.launch_kernel(
            self.func,
            config.grid_dim,
            config.group_dim,
            config.shared_mem_bytes,
            stream_handle,
            &mut ptrs,
        )
    }

    /// Unload the native module.
    ///
    /// Idempotent and infallible; an unload failure is logged and
    /// swallowed. Handles are cleared after the unload.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.loaded && self.module != 0 {
            if let Err(e) = self.accel.driver.module_unload(self.module) {
                tracing::warn!(entry = %self.entry, error = %e, "module unload failed");
            }
        }
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.dispose();
        self.module = 0;
        self.func = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_config_for_len_rounds_up() {
        let config = LaunchConfig::for_len(256, 64);
        assert_eq!(config.grid_dim, [4, 1, 1]);
        let config = LaunchConfig::for_len(257, 64);
        assert_eq!(config.grid_dim, [5, 1, 1]);
        let config = LaunchConfig::for_len(0, 64);
        assert_eq!(config.grid_dim, [1, 1, 1]);
    }

    #[test]
    fn params_marshal_one_word_per_arg() {
        let mut params = KernelParams::new().u32(7).f32(1.5).usize(42);
        assert_eq!(params.len(), 3);
        let ptrs = params.as_void_ptrs();
        assert_eq!(ptrs.len(), 3);
        let first = unsafe { *(ptrs[0] as *const u32) };
        assert_eq!(first, 7);
    }
}
