//! Device probing and the startup fallback policy.
//!
//! [`select_device`] is called once at startup. With [`DevicePreference::Auto`]
//! it walks [`DeviceKind::FALLBACK_ORDER`] and emits a warning for every kind
//! it had to skip. An explicit preference never falls back: if the requested
//! device is missing the caller gets [`ComputeError::DeviceUnavailable`]
//! before any model is loaded.

use std::fmt;
use std::str::FromStr;

use crate::ComputeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Discrete or integrated GPU reachable through Vulkan / DX12.
    Gpu,
    /// Platform accelerator (Metal on Apple hardware).
    Accelerator,
    Cpu,
}

impl DeviceKind {
    /// Order in which [`DevicePreference::Auto`] tries device kinds.
    pub const FALLBACK_ORDER: [DeviceKind; 3] =
        [DeviceKind::Gpu, DeviceKind::Accelerator, DeviceKind::Cpu];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            DeviceKind::Gpu => "gpu",
            DeviceKind::Accelerator => "accelerator",
            DeviceKind::Cpu => "cpu",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A concrete device the models are placed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub kind: DeviceKind,
    pub name: String,
}

impl Device {
    #[must_use]
    pub fn new(kind: DeviceKind, name: impl Into<String>) -> Self {
        Self { kind, name: name.into() }
    }

    #[must_use]
    pub fn cpu() -> Self {
        Self::new(DeviceKind::Cpu, "host cpu")
    }

    #[must_use]
    pub fn is_gpu(&self) -> bool {
        self.kind == DeviceKind::Gpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Only(DeviceKind),
}

impl FromStr for DevicePreference {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "gpu" | "cuda" => Ok(DevicePreference::Only(DeviceKind::Gpu)),
            "accelerator" | "mps" | "metal" => Ok(DevicePreference::Only(DeviceKind::Accelerator)),
            "cpu" => Ok(DevicePreference::Only(DeviceKind::Cpu)),
            other => Err(ComputeError::UnknownPreference(other.to_string())),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => f.write_str("auto"),
            DevicePreference::Only(kind) => kind.fmt(f),
        }
    }
}

/// Source of truth for which devices exist on the host.
pub trait DeviceProbe {
    /// Returns the first device of `kind`, if the host has one.
    fn find(&self, kind: DeviceKind) -> Option<Device>;
}

/// Probes the real host. GPU and accelerator discovery needs the `gpu`
/// feature; without it only the CPU is reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl DeviceProbe for SystemProbe {
    fn find(&self, kind: DeviceKind) -> Option<Device> {
        match kind {
            DeviceKind::Cpu => Some(Device::cpu()),
            #[cfg(feature = "gpu")]
            DeviceKind::Gpu | DeviceKind::Accelerator => adapters::find(kind),
            #[cfg(not(feature = "gpu"))]
            DeviceKind::Gpu | DeviceKind::Accelerator => None,
        }
    }
}

#[cfg(feature = "gpu")]
mod adapters {
    use super::{Device, DeviceKind};

    /// Classifies wgpu adapters: Metal adapters are the accelerator tier,
    /// any other hardware adapter counts as a GPU. Software rasterizers are
    /// ignored.
    pub(super) fn find(kind: DeviceKind) -> Option<Device> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .map(|adapter| adapter.get_info())
            .filter(|info| {
                matches!(
                    info.device_type,
                    wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu
                )
            })
            .find(|info| classify(info.backend) == kind)
            .map(|info| Device::new(kind, info.name))
    }

    fn classify(backend: wgpu::Backend) -> DeviceKind {
        match backend {
            wgpu::Backend::Metal => DeviceKind::Accelerator,
            _ => DeviceKind::Gpu,
        }
    }
}

/// Fixed device table, used by tests and by hosts that pin a device list.
#[derive(Debug, Default, Clone)]
pub struct StaticProbe {
    devices: Vec<Device>,
}

impl StaticProbe {
    #[must_use]
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }
}

impl DeviceProbe for StaticProbe {
    fn find(&self, kind: DeviceKind) -> Option<Device> {
        self.devices.iter().find(|d| d.kind == kind).cloned()
    }
}

/// Outcome of [`select_device`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub device: Device,
    /// Kinds that were tried and skipped before `device` was found.
    pub downgrades: Vec<DeviceKind>,
}

/// Picks the device for this process.
///
/// # Errors
///
/// [`ComputeError::DeviceUnavailable`] when an explicitly requested kind is
/// missing, [`ComputeError::NoDevice`] when `Auto` finds nothing at all.
pub fn select_device(
    preference: DevicePreference,
    probe: &dyn DeviceProbe,
) -> Result<Selection, ComputeError> {
    match preference {
        DevicePreference::Only(kind) => probe
            .find(kind)
            .map(|device| Selection { device, downgrades: Vec::new() })
            .ok_or(ComputeError::DeviceUnavailable(kind)),
        DevicePreference::Auto => {
            let mut downgrades = Vec::new();
            for kind in DeviceKind::FALLBACK_ORDER {
                if let Some(device) = probe.find(kind) {
                    if let Some(first) = downgrades.first() {
                        tracing::warn!(
                            "preferred device `{first}` unavailable; running models on {device}"
                        );
                    }
                    return Ok(Selection { device, downgrades });
                }
                tracing::warn!("no `{kind}` device found, trying the next tier");
                downgrades.push(kind);
            }
            Err(ComputeError::NoDevice)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_preferences_case_insensitively() {
        assert_eq!("AUTO".parse::<DevicePreference>(), Ok(DevicePreference::Auto));
        assert_eq!(
            "mps".parse::<DevicePreference>(),
            Ok(DevicePreference::Only(DeviceKind::Accelerator))
        );
        assert_eq!(
            " cuda ".parse::<DevicePreference>(),
            Ok(DevicePreference::Only(DeviceKind::Gpu))
        );
        assert!(matches!(
            "tpu".parse::<DevicePreference>(),
            Err(ComputeError::UnknownPreference(_))
        ));
    }

    #[test]
    fn system_probe_always_has_a_cpu() {
        assert_eq!(SystemProbe.find(DeviceKind::Cpu), Some(Device::cpu()));
    }
}
