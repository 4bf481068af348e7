//! Process-wide backend registry
//!
//! [`Context`] probes the compiled-in backends, enumerates their devices,
//! and is the only construction path for accelerators. Probing never
//! throws when a vendor driver is absent; the backend simply contributes
//! zero devices, and the host CPU device is always present so a degraded
//! accelerator can be built on any machine.

use crate::accelerator::Accelerator;
use crate::backends::cpu::CpuDriver;
use crate::backends::{Backend, NativeDriver};
use crate::device::DeviceDescriptor;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Registry of available backends and their devices.
pub struct Context {
    drivers: Vec<Arc<dyn NativeDriver>>,
}

impl Context {
    /// Probe all compiled-in backends.
    pub fn new() -> Self {
        let mut drivers: Vec<Arc<dyn NativeDriver>> = Vec::new();

        #[cfg(feature = "cuda")]
        drivers.push(Arc::new(crate::backends::cuda::CudaDriver::new()));

        #[cfg(feature = "hip")]
        drivers.push(Arc::new(crate::backends::hip::HipDriver::new()));

        drivers.push(Arc::new(CpuDriver::new()));

        for driver in &drivers {
            tracing::debug!(
                backend = %driver.backend(),
                available = driver.is_available(),
                devices = driver.device_count(),
                "probed backend"
            );
        }

        Self { drivers }
    }

    /// Enumerate devices across all backends.
    ///
    /// Re-queries the drivers on every call; results are never cached, so
    /// hot-plugged or newly visible devices show up. A device whose native
    /// property query fails is reported through the conservative
    /// [`DeviceDescriptor::fallback`] rather than dropped or errored.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        let mut out = Vec::new();
        for driver in &self.drivers {
            if !driver.is_available() {
                continue;
            }
            for index in 0..driver.device_count() {
                let desc = driver
                    .device_properties(index)
                    .unwrap_or_else(|| DeviceDescriptor::fallback(driver.backend(), index));
                out.push(desc);
            }
        }
        out
    }

    /// Construct an accelerator for `device`.
    ///
    /// Initializes the backend runtime, selects the device, opens a native
    /// context, and creates the default stream. Fails with a typed error
    /// when native context creation fails; the degraded path on a
    /// driverless machine is the CPU device, not a fake GPU context.
    pub fn create_accelerator(&self, device: &DeviceDescriptor) -> Result<Accelerator> {
        let driver = self
            .drivers
            .iter()
            .find(|d| d.backend() == device.backend)
            .ok_or(Error::Unsupported {
                backend: device.backend,
                op: "accelerator construction (backend not compiled in)",
            })?;
        Accelerator::new(Arc::clone(driver), device.clone())
    }

    /// Convenience constructor for the always-available host accelerator.
    pub fn create_host_accelerator(&self) -> Result<Accelerator> {
        self.create_accelerator(&DeviceDescriptor::host())
    }

    /// Backends compiled into this build, in probe order.
    pub fn backends(&self) -> Vec<Backend> {
        self.drivers.iter().map(|d| d.backend()).collect()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
