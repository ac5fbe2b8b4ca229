//! Compute device selection

use domain::value_objects::ComputeDevice;
use tracing::{info, warn};

use crate::config::DevicePreference;

/// Logical CPUs available to the ndarray backend
pub(crate) fn cpu_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Name of a usable GPU adapter, if any
///
/// Runs a one-element tensor round trip on the default `wgpu` device.
/// Adapter discovery panics when no adapter exists, so the round trip
/// runs under `catch_unwind`.
#[cfg(feature = "accelerator")]
pub fn detect_accelerator() -> Option<String> {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use burn::{backend::wgpu::WgpuDevice, tensor::Tensor};

    use crate::model::AcceleratorBackend;

    let device = WgpuDevice::default();
    let round_trip = catch_unwind(AssertUnwindSafe(|| {
        Tensor::<AcceleratorBackend, 1>::zeros([1], &device)
            .into_data()
            .to_vec::<f32>()
            .is_ok()
    }));

    match round_trip {
        Ok(true) => Some(format!("wgpu:{device:?}")),
        Ok(false) | Err(_) => {
            warn!("No usable wgpu adapter");
            None
        },
    }
}

/// Name of a usable GPU adapter, if any
///
/// Always `None` when built without the `accelerator` feature.
#[cfg(not(feature = "accelerator"))]
pub const fn detect_accelerator() -> Option<String> {
    None
}

/// Pick the device for the lifetime of the process
pub fn resolve_device(preference: DevicePreference) -> ComputeDevice {
    let accelerator = match preference {
        DevicePreference::Cpu => None,
        DevicePreference::Auto | DevicePreference::Accelerator => detect_accelerator(),
    };
    select_device(preference, accelerator, cpu_threads())
}

/// Combine the configured preference with what detection found
pub fn select_device(
    preference: DevicePreference,
    accelerator: Option<String>,
    threads: usize,
) -> ComputeDevice {
    match (preference, accelerator) {
        (DevicePreference::Auto | DevicePreference::Accelerator, Some(name)) => {
            info!(accelerator = %name, "Using accelerator");
            ComputeDevice::Accelerator { name }
        },
        (DevicePreference::Accelerator, None) => {
            warn!(threads, "Accelerator requested but none available, using CPU");
            ComputeDevice::Cpu { threads }
        },
        (DevicePreference::Auto | DevicePreference::Cpu, _) => ComputeDevice::Cpu { threads },
    }
}
