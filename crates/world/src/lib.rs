#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
//! # World model environment
//!
//! The core of the interactive player: a stepping environment whose next
//! frame, reward and termination flag come from generative models rather
//! than a game engine.
//!
//! ## Key Components
//!
//! -   **Observations and actions:** [`Observation`] is an immutable, shared
//!     RGB frame; [`ActionSchema`] describes which buttons (and whether a
//!     pointer delta) make up an [`Action`].
//! -   **Conditioning windows:** [`ConditioningWindow`] keeps the last `k`
//!     `(observation, action)` pairs a model is conditioned on.
//! -   **Models:** the [`FramePredictor`], [`Upsampler`] and
//!     [`RewardEndModel`] traits, guarded by the adapters in [`model`] and
//!     bundled into an [`Agent`]. [`builtin`] has stand-in implementations.
//! -   **Environment:** [`WorldModelEnv`] implements `reset` / `step`.
//! -   **Recording:** [`EpisodeRecorder`] buffers steps and hands finished
//!     episodes to an [`EpisodeSink`] such as [`DirectorySink`].
//! -   **Spawn points:** [`SpawnSource`] provides the initial history, from
//!     memory ([`SpawnList`]) or disk ([`SpawnDirectory`]).

pub mod action;
pub mod agent;
pub mod builtin;
pub mod context;
pub mod env;
pub mod error;
pub mod model;
pub mod observation;
pub mod recorder;
pub mod spawn;

pub use action::{Action, ActionSchema};
pub use agent::Agent;
pub use context::{ConditioningWindow, ContextView};
pub use env::{EnvOptions, EnvState, StepOutcome, WorldModelEnv};
pub use error::{InferenceError, RecordingError, Result, WorldError};
pub use model::{
    DenoisingTrajectory, FramePredictor, FramePredictorAdapter, FrameSample, Prediction,
    RewardEnd, RewardEndModel, Upsampler, UpsamplerAdapter,
};
pub use observation::{Observation, Resolution, CHANNELS};
pub use recorder::{
    DirectorySink, EpisodeManifest, EpisodeRecord, EpisodeRecorder, EpisodeSink, MemorySink,
    PersistedEpisode, RecordOptions, StepManifest, StepRecord,
};
pub use spawn::{SpawnDirectory, SpawnList, SpawnSnapshot, SpawnSource};
