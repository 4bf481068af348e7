//! Device capability descriptors
//!
//! A [`DeviceDescriptor`] is produced once at enumeration time and immutable
//! thereafter. Many accelerators may be built from the same descriptor; each
//! owns an independent native context.

use crate::backends::Backend;

/// Optional hardware feature flags reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceFeatures {
    /// Host and device share one address space
    pub unified_addressing: bool,
    /// Driver-managed migratable memory
    pub managed_memory: bool,
    /// Grid-wide cooperative kernel launch
    pub cooperative_launch: bool,
    /// Multiple kernels may execute concurrently
    pub concurrent_kernels: bool,
    /// Device can map peer memory
    pub peer_access: bool,
}

/// Immutable description of one compute device's capabilities.
///
/// All size and count fields are non-negative by construction. When a native
/// query fails, [`DeviceDescriptor::fallback`] is substituted so higher
/// layers can still build a degraded, host-backed accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Backend this device belongs to
    pub backend: Backend,
    /// Backend-specific device ordinal
    pub index: usize,
    /// Human-readable device name
    pub name: String,
    /// Total device memory in bytes
    pub total_memory: u64,
    /// Maximum grid dimensions (x, y, z)
    pub max_grid_dim: [u32; 3],
    /// Maximum group/block dimensions (x, y, z)
    pub max_group_dim: [u32; 3],
    /// Maximum threads per group
    pub max_threads_per_group: u32,
    /// Maximum resident threads per multiprocessor
    pub max_threads_per_multiprocessor: u32,
    /// Number of multiprocessors (SMs / CUs)
    pub multiprocessor_count: u32,
    /// Warp (CUDA) / wavefront (ROCm) size
    pub warp_size: u32,
    /// Maximum dynamic shared memory per group in bytes
    pub max_shared_memory_per_group: u32,
    /// Maximum constant memory in bytes
    pub max_constant_memory: u32,
    /// Feature flags
    pub features: DeviceFeatures,
}

impl DeviceDescriptor {
    /// Conservative fallback descriptor used when the native property query
    /// fails or the driver is absent.
    ///
    /// The values are deterministic and deliberately do not reflect real
    /// hardware: 8 GiB memory, 36 multiprocessors, warp size 64 (32 for
    /// CUDA), 1024-thread groups, 64 KiB shared and constant memory. This
    /// trades strict correctness for the ability to run the same program
    /// path on machines without a vendor driver installed.
    pub fn fallback(backend: Backend, index: usize) -> Self {
        let warp_size = match backend {
            Backend::Cuda => 32,
            Backend::Hip | Backend::Cpu => 64,
        };
        Self {
            backend,
            index,
            name: format!("{backend}:{index} (fallback)"),
            total_memory: 8 * 1024 * 1024 * 1024,
            max_grid_dim: [i32::MAX as u32, 65_535, 65_535],
            max_group_dim: [1024, 1024, 64],
            max_threads_per_group: 1024,
            max_threads_per_multiprocessor: 2560,
            multiprocessor_count: 36,
            warp_size,
            max_shared_memory_per_group: 64 * 1024,
            max_constant_memory: 64 * 1024,
            features: DeviceFeatures::default(),
        }
    }

    /// Descriptor for the host CPU device.
    ///
    /// There is exactly one CPU device; it reuses the conservative fallback
    /// limits so group-size estimation behaves identically with and without
    /// a vendor driver present.
    pub fn host() -> Self {
        let mut desc = Self::fallback(Backend::Cpu, 0);
        desc.name = "cpu".to_string();
        desc.features.unified_addressing = true;
        desc
    }

    /// Total bytes divided by warp-aligned group capacity, used by callers
    /// sizing staging buffers. Zero only for a zero-memory descriptor,
    /// which [`Self::fallback`] never produces.
    pub fn max_groups_in_flight(&self) -> u64 {
        u64::from(self.multiprocessor_count)
            * u64::from(self.max_threads_per_multiprocessor / self.warp_size.max(1))
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}:{}]", self.name, self.backend, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_deterministic_and_nonzero() {
        let a = DeviceDescriptor::fallback(Backend::Hip, 1);
        let b = DeviceDescriptor::fallback(Backend::Hip, 1);
        assert_eq!(a, b);
        assert!(a.total_memory > 0);
        assert!(a.multiprocessor_count > 0);
        assert_eq!(a.warp_size, 64);
        assert_eq!(a.max_threads_per_group, 1024);
    }

    #[test]
    fn cuda_fallback_uses_warp_32() {
        let desc = DeviceDescriptor::fallback(Backend::Cuda, 0);
        assert_eq!(desc.warp_size, 32);
    }

    #[test]
    fn host_descriptor_reports_unified_addressing() {
        let desc = DeviceDescriptor::host();
        assert_eq!(desc.backend, Backend::Cpu);
        assert!(desc.features.unified_addressing);
    }
}
