//! Device modes and physical device resolution.
//!
//! The mode a caller *requests* and the device a load actually *resolves to*
//! are deliberately distinct types. Residency keys are built from the
//! requested mode only; resolution happens once per load.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The caller's requested execution target class.
///
/// This is one half of the residency key. Two loads requesting `auto` share a
/// cache entry even if hardware availability changed between them - keying by
/// the requested mode rather than the resolved device is contract, not
/// accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Auto,
    Cpu,
    Gpu,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceMode::Auto => "auto",
            DeviceMode::Cpu => "cpu",
            DeviceMode::Gpu => "gpu",
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(DeviceMode::Auto),
            "cpu" => Ok(DeviceMode::Cpu),
            "gpu" => Ok(DeviceMode::Gpu),
            other => Err(other.to_string()),
        }
    }
}

/// The physical device a load resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedDevice {
    Cpu,
    /// NVIDIA device by ordinal.
    Cuda(usize),
    /// Apple Silicon GPU.
    Metal,
}

impl ResolvedDevice {
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, ResolvedDevice::Cpu)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedDevice::Cpu => "cpu",
            ResolvedDevice::Cuda(_) => "cuda",
            ResolvedDevice::Metal => "metal",
        }
    }

    /// Best-effort reclamation after a handle is dropped.
    ///
    /// Failures are logged and swallowed; unload reports success once the
    /// table entry is gone, whether or not the accelerator cooperated.
    pub fn release_cached_memory(&self) {
        match self {
            ResolvedDevice::Cpu => {}
            ResolvedDevice::Cuda(_ordinal) => {
                #[cfg(feature = "cuda")]
                match cudarc::driver::CudaDevice::new(*_ordinal) {
                    Ok(dev) => {
                        if let Err(e) = dev.synchronize() {
                            tracing::warn!(ordinal = _ordinal, error = %e, "cuda reclamation pass failed");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(ordinal = _ordinal, error = %e, "cuda device unavailable for reclamation");
                    }
                }
            }
            ResolvedDevice::Metal => {
                // Metal frees pooled allocations when the last reference drops.
            }
        }
    }
}

impl fmt::Display for ResolvedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedDevice::Cuda(n) => write!(f, "cuda:{n}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Probe for a usable accelerator.
fn accelerator_available() -> Option<ResolvedDevice> {
    #[cfg(feature = "cuda")]
    {
        if matches!(cudarc::driver::CudaDevice::count(), Ok(n) if n > 0) {
            return Some(ResolvedDevice::Cuda(0));
        }
    }
    #[cfg(all(feature = "metal", target_os = "macos"))]
    {
        if metal::Device::system_default().is_some() {
            return Some(ResolvedDevice::Metal);
        }
    }
    None
}

/// Resolve a requested mode to a physical device.
///
/// `auto` takes the accelerator when present, `cpu` is forced, and `gpu`
/// falls back to the CPU with a warning when no accelerator is found - the
/// load still succeeds.
pub fn resolve(mode: DeviceMode) -> ResolvedDevice {
    match mode {
        DeviceMode::Cpu => ResolvedDevice::Cpu,
        DeviceMode::Auto => accelerator_available().unwrap_or(ResolvedDevice::Cpu),
        DeviceMode::Gpu => match accelerator_available() {
            Some(dev) => dev,
            None => {
                tracing::warn!("gpu mode requested but no accelerator detected; using cpu");
                ResolvedDevice::Cpu
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes() {
        assert_eq!("auto".parse::<DeviceMode>().unwrap(), DeviceMode::Auto);
        assert_eq!("cpu".parse::<DeviceMode>().unwrap(), DeviceMode::Cpu);
        assert_eq!("gpu".parse::<DeviceMode>().unwrap(), DeviceMode::Gpu);
    }

    #[test]
    fn rejects_unknown_mode() {
        assert_eq!("tpu".parse::<DeviceMode>().unwrap_err(), "tpu");
    }

    #[test]
    fn cpu_mode_is_forced() {
        assert_eq!(resolve(DeviceMode::Cpu), ResolvedDevice::Cpu);
    }

    #[test]
    fn gpu_mode_never_fails_resolution() {
        // Either an accelerator or the documented cpu fallback.
        let _ = resolve(DeviceMode::Gpu);
    }

    #[test]
    fn display_round_trips_mode() {
        for mode in [DeviceMode::Auto, DeviceMode::Cpu, DeviceMode::Gpu] {
            assert_eq!(mode.to_string().parse::<DeviceMode>().unwrap(), mode);
        }
    }

    #[test]
    fn cpu_reclamation_is_a_noop() {
        ResolvedDevice::Cpu.release_cached_memory();
    }
}
