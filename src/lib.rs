//! # hetra
//!
//! **Heterogeneous-compute runtime: one device/accelerator/buffer/kernel
//! model over CUDA, ROCm/HIP, and a host fallback.**
//!
//! hetra provides a uniform contract (allocate, copy, launch, synchronize,
//! free) over backends whose native semantics, error models, and resource
//! lifetimes all differ - and degrades gracefully (native allocation to
//! host fallback, native launch to simulated launch) when a vendor driver
//! is not installed, without that degradation silently changing observable
//! behavior.
//!
//! ## Why hetra?
//!
//! - **One model**: the same `Accelerator`/`MemoryBuffer`/`Stream`/`Kernel`
//!   code path runs against CUDA, HIP, or the host CPU
//! - **Observable degradation**: driverless environments are a capability
//!   flag (`Accelerator::is_simulated`, `MemoryBuffer::is_native_allocation`,
//!   `Kernel::is_loaded`), never an invisible fallback
//! - **RAII lifetimes**: buffers, kernels, and streams keep their
//!   accelerator's native context alive; teardown is reverse-dependency
//!   ordered with no manual sequencing
//!
//! ## Quick Start
//!
//! ```rust
//! use hetra::prelude::*;
//!
//! # fn main() -> hetra::error::Result<()> {
//! let ctx = Context::new();
//! let accel = ctx.create_host_accelerator()?;
//!
//! let buf = accel.allocate_raw(1024, 4)?;
//! buf.write(0, &[1, 2, 3, 4])?;
//!
//! let mut out = [0u8; 4];
//! buf.read(0, &mut out)?;
//! assert_eq!(out, [1, 2, 3, 4]);
//!
//! accel.synchronize()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `cuda`: NVIDIA CUDA backend (via cudarc, driver loaded at runtime)
//! - `hip`: AMD ROCm/HIP backend (links `amdhip64`)
//!
//! The host CPU backend is always available and needs no feature.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accelerator;
pub mod backends;
pub mod buffer;
pub mod context;
pub mod device;
pub mod error;
pub mod kernel;
pub mod linalg;
pub mod stream;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::accelerator::Accelerator;
    pub use crate::backends::{Backend, CopyKind};
    pub use crate::buffer::MemoryBuffer;
    pub use crate::context::Context;
    pub use crate::device::{DeviceDescriptor, DeviceFeatures};
    pub use crate::error::{Error, Result};
    pub use crate::kernel::{CompiledKernel, Kernel, KernelInfo, KernelParams, LaunchConfig};
    pub use crate::linalg::execute_matmul;
    pub use crate::stream::Stream;
}
