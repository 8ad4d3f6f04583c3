#![deny(clippy::all, clippy::pedantic)]
//! Compute device discovery and execution-path selection.
//!
//! Model inference runs on exactly one device for the lifetime of the process.
//! This crate decides which one: it probes what the host offers, applies the
//! GPU → accelerator → CPU fallback policy and picks between the reference
//! and the ahead-of-time compiled ("accelerated") execution path. Nothing here
//! runs a model; the chosen [`Device`] and [`ExecutionPath`] are handed to the
//! model layer once, before the interactive loop starts.

use thiserror::Error;

pub mod device;
pub mod execution;

pub use device::{
    select_device, Device, DeviceKind, DevicePreference, DeviceProbe, Selection, StaticProbe,
    SystemProbe,
};
pub use execution::ExecutionPath;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComputeError {
    #[error("requested compute device `{0}` is not available")]
    DeviceUnavailable(DeviceKind),
    #[error("no compute device is available on this host")]
    NoDevice,
    #[error("unknown device preference `{0}` (expected auto, gpu, accelerator or cpu)")]
    UnknownPreference(String),
}
