use crate::device::Device;

/// How model inference is executed for the whole session.
///
/// Chosen once from configuration. `Accelerated` means the models are
/// specialised ahead of time for the device before the first tick; it is
/// never entered lazily mid-episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionPath {
    #[default]
    Reference,
    Accelerated,
}

impl ExecutionPath {
    /// Compilation is only honoured on GPU devices; elsewhere the request is
    /// dropped with a warning and the reference path is used.
    #[must_use]
    pub fn select(device: &Device, compile_requested: bool) -> Self {
        if !compile_requested {
            return ExecutionPath::Reference;
        }
        if device.is_gpu() {
            ExecutionPath::Accelerated
        } else {
            tracing::warn!(
                "model compilation is only supported on GPU devices; using the reference path on {device}"
            );
            ExecutionPath::Reference
        }
    }

    #[must_use]
    pub const fn is_accelerated(self) -> bool {
        matches!(self, ExecutionPath::Accelerated)
    }
}
