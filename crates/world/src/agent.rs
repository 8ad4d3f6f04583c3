use std::time::Instant;

use compute::{Device, ExecutionPath};

use crate::error::{InferenceError, Result};
use crate::model::{
    FramePredictor, FramePredictorAdapter, RewardEndModel, Upsampler, UpsamplerAdapter,
};

/// The set of models driving one environment, already placed on a device.
pub struct Agent {
    predictor: FramePredictorAdapter,
    upsampler: Option<UpsamplerAdapter>,
    prepared: Option<ExecutionPath>,
}

impl Agent {
    #[must_use]
    pub fn new(predictor: Box<dyn FramePredictor>) -> Self {
        Self {
            predictor: FramePredictorAdapter::new(predictor, None),
            upsampler: None,
            prepared: None,
        }
    }

    #[must_use]
    pub fn with_reward_end(mut self, reward_end: Box<dyn RewardEndModel>) -> Self {
        self.predictor.set_reward_end(reward_end);
        self
    }

    /// # Errors
    ///
    /// An upsampler declaring zero history is a configuration error.
    pub fn with_upsampler(mut self, upsampler: Box<dyn Upsampler>) -> Result<Self> {
        self.upsampler = Some(UpsamplerAdapter::new(upsampler)?);
        Ok(self)
    }

    /// Base conditioning window length: the larger of the two models'
    /// requirements.
    #[must_use]
    pub fn history_len(&self) -> usize {
        let base = self.predictor.history_len();
        self.upsampler
            .as_ref()
            .map_or(base, |u| base.max(u.history_len()))
    }

    #[must_use]
    pub fn has_upsampler(&self) -> bool {
        self.upsampler.is_some()
    }

    #[must_use]
    pub fn execution_path(&self) -> Option<ExecutionPath> {
        self.prepared
    }

    /// Applies the session's execution strategy. On the accelerated path every
    /// model is compiled here, eagerly, so no step ever pays for it.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates compilation failures.
    pub fn prepare(&mut self, path: ExecutionPath, device: &Device) -> Result<(), InferenceError> {
        if let Some(done) = self.prepared {
            tracing::debug!("agent already prepared for the {done:?} path");
            return Ok(());
        }
        if path.is_accelerated() {
            tracing::info!("Compiling models for {device}...");
            let started = Instant::now();
            self.predictor.compile(device)?;
            if let Some(upsampler) = self.upsampler.as_mut() {
                upsampler.compile(device)?;
            }
            tracing::info!("Models compiled in {:.2?}", started.elapsed());
        }
        self.prepared = Some(path);
        Ok(())
    }

    pub(crate) fn into_parts(self) -> (FramePredictorAdapter, Option<UpsamplerAdapter>) {
        (self.predictor, self.upsampler)
    }
}
