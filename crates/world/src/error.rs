use std::path::PathBuf;

use thiserror::Error;

use crate::env::EnvState;

/// Failure of a model call. Always fatal to the episode in progress: a
/// generative step is never retried against the same context.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("{model} failed: {source}")]
    Model {
        model: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("{model} expects {expected} context frames, got {actual}")]
    ContextLength {
        model: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{model} produced a {actual:?} observation, expected {expected:?}")]
    MalformedOutput {
        model: &'static str,
        expected: [usize; 3],
        actual: [usize; 3],
    },
    #[error("reward model produced a non-finite reward ({0})")]
    NonFiniteReward(f32),
}

impl InferenceError {
    /// Wraps an arbitrary model-side error.
    pub fn model(
        model: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        InferenceError::Model { model, source: source.into() }
    }
}

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("recording i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode frame {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write episode metadata: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WorldError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("cannot {operation} while the environment is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: EnvState,
    },
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error("spawn point {index}: {reason}")]
    Spawn { index: usize, reason: String },
    #[error(transparent)]
    Recording(#[from] RecordingError),
}

impl WorldError {
    #[must_use]
    pub fn is_inference(&self) -> bool {
        matches!(self, WorldError::Inference(_))
    }
}

pub type Result<T, E = WorldError> = std::result::Result<T, E>;
