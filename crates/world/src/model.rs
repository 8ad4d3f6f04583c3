//! Model capabilities and the adapters that guard them.
//!
//! The generative models are black boxes: the core only knows how much
//! history each one wants and what shape it promises to return. The traits
//! below are that contract; the adapters enforce it on every call so that a
//! misbehaving model surfaces as an [`InferenceError`] instead of a corrupt
//! frame in the conditioning window.

use compute::Device;

use crate::action::Action;
use crate::context::{ConditioningWindow, ContextView};
use crate::error::{InferenceError, Result};
use crate::observation::{Observation, Resolution};

/// Intermediate states a diffusion-style sampler passes through for one
/// frame, first to last. Diagnostic only; never fed back as context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DenoisingTrajectory {
    states: Vec<Observation>,
}

impl DenoisingTrajectory {
    #[must_use]
    pub fn new(states: Vec<Observation>) -> Self {
        Self { states }
    }

    #[must_use]
    pub fn states(&self) -> &[Observation] {
        &self.states
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Output of a generative pass.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub observation: Observation,
    pub trajectory: Option<DenoisingTrajectory>,
}

impl FrameSample {
    #[must_use]
    pub fn new(observation: Observation) -> Self {
        Self { observation, trajectory: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardEnd {
    pub reward: f32,
    pub end: bool,
}

/// Next-frame generator at base resolution.
pub trait FramePredictor {
    /// Exact number of context pairs [`FramePredictor::predict`] expects.
    fn history_len(&self) -> usize;

    fn resolution(&self) -> Resolution;

    /// Generates the frame that follows `context` under `action`. When
    /// `capture_trajectory` is false the model may skip building a
    /// trajectory.
    ///
    /// # Errors
    ///
    /// Any model-side failure.
    fn predict(
        &mut self,
        context: ContextView<'_>,
        action: &Action,
        capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError>;

    /// Drops any per-episode hidden state.
    fn reset(&mut self) {}

    /// Ahead-of-time specialisation for `device`; called at most once, before
    /// the first step.
    ///
    /// # Errors
    ///
    /// Any model-side failure.
    fn compile(&mut self, _device: &Device) -> Result<(), InferenceError> {
        Ok(())
    }
}

/// Second-stage model mapping a base frame to a higher resolution.
pub trait Upsampler {
    fn history_len(&self) -> usize;

    fn resolution(&self) -> Resolution;

    /// # Errors
    ///
    /// Any model-side failure.
    fn upsample(
        &mut self,
        context: ContextView<'_>,
        low_res: &Observation,
        action: &Action,
        capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError>;

    fn reset(&mut self) {}

    /// # Errors
    ///
    /// Any model-side failure.
    fn compile(&mut self, _device: &Device) -> Result<(), InferenceError> {
        Ok(())
    }
}

/// Reward estimate and termination signal for a generated frame.
pub trait RewardEndModel {
    /// # Errors
    ///
    /// Any model-side failure.
    fn predict(
        &mut self,
        context: ContextView<'_>,
        action: &Action,
        next: &Observation,
    ) -> Result<RewardEnd, InferenceError>;

    fn reset(&mut self) {}

    /// # Errors
    ///
    /// Any model-side failure.
    fn compile(&mut self, _device: &Device) -> Result<(), InferenceError> {
        Ok(())
    }
}

/// Everything one base-resolution step produces.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub observation: Observation,
    pub reward: f32,
    pub end: bool,
    pub trajectory: Option<DenoisingTrajectory>,
}

fn check_shape(
    model: &'static str,
    expected: Resolution,
    observation: &Observation,
) -> Result<(), InferenceError> {
    if observation.resolution() == expected {
        Ok(())
    } else {
        Err(InferenceError::MalformedOutput {
            model,
            expected: expected.shape(),
            actual: observation.shape(),
        })
    }
}

fn check_sample(
    model: &'static str,
    expected: Resolution,
    sample: &FrameSample,
) -> Result<(), InferenceError> {
    check_shape(model, expected, &sample.observation)?;
    if let Some(trajectory) = &sample.trajectory {
        for state in trajectory.states() {
            check_shape(model, expected, state)?;
        }
    }
    Ok(())
}

/// Frame predictor plus the optional reward/end model.
pub struct FramePredictorAdapter {
    predictor: Box<dyn FramePredictor>,
    reward_end: Option<Box<dyn RewardEndModel>>,
}

impl FramePredictorAdapter {
    const MODEL: &'static str = "frame predictor";

    #[must_use]
    pub fn new(
        predictor: Box<dyn FramePredictor>,
        reward_end: Option<Box<dyn RewardEndModel>>,
    ) -> Self {
        Self { predictor, reward_end }
    }

    pub fn set_reward_end(&mut self, reward_end: Box<dyn RewardEndModel>) {
        self.reward_end = Some(reward_end);
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.predictor.history_len()
    }

    #[must_use]
    pub fn resolution(&self) -> Resolution {
        self.predictor.resolution()
    }

    /// Runs one generative step. `context` must hold exactly
    /// [`Self::history_len`] pairs; it is only ever read.
    ///
    /// Without a reward/end model the reward is `0.0` and the episode never
    /// ends on its own.
    ///
    /// # Errors
    ///
    /// [`InferenceError`] on a wrong context length, a model failure, a
    /// mis-shaped output or a non-finite reward.
    pub fn predict(
        &mut self,
        context: ContextView<'_>,
        action: &Action,
        capture_trajectory: bool,
    ) -> Result<Prediction, InferenceError> {
        let expected = self.history_len();
        if context.len() != expected {
            return Err(InferenceError::ContextLength {
                model: Self::MODEL,
                expected,
                actual: context.len(),
            });
        }

        let mut sample = self.predictor.predict(context, action, capture_trajectory)?;
        check_sample(Self::MODEL, self.resolution(), &sample)?;
        if !capture_trajectory {
            sample.trajectory = None;
        }

        let RewardEnd { reward, end } = match self.reward_end.as_mut() {
            Some(model) => model.predict(context, action, &sample.observation)?,
            None => RewardEnd { reward: 0.0, end: false },
        };
        if !reward.is_finite() {
            return Err(InferenceError::NonFiniteReward(reward));
        }

        Ok(Prediction {
            observation: sample.observation,
            reward,
            end,
            trajectory: sample.trajectory,
        })
    }

    pub fn reset(&mut self) {
        self.predictor.reset();
        if let Some(model) = self.reward_end.as_mut() {
            model.reset();
        }
    }

    /// # Errors
    ///
    /// Propagates compilation failures.
    pub fn compile(&mut self, device: &Device) -> Result<(), InferenceError> {
        self.predictor.compile(device)?;
        if let Some(model) = self.reward_end.as_mut() {
            model.compile(device)?;
        }
        Ok(())
    }
}

/// Upsampler plus its own high-resolution conditioning window.
pub struct UpsamplerAdapter {
    upsampler: Box<dyn Upsampler>,
    window: ConditioningWindow,
}

impl UpsamplerAdapter {
    const MODEL: &'static str = "upsampler";

    /// # Errors
    ///
    /// A model declaring zero history is a configuration error.
    pub fn new(upsampler: Box<dyn Upsampler>) -> Result<Self> {
        let window = ConditioningWindow::new(upsampler.history_len())?;
        Ok(Self { upsampler, window })
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.upsampler.history_len()
    }

    #[must_use]
    pub fn resolution(&self) -> Resolution {
        self.upsampler.resolution()
    }

    #[must_use]
    pub fn window(&self) -> ContextView<'_> {
        self.window.window()
    }

    /// Re-initialises the high-resolution window from a spawn snapshot and
    /// drops model hidden state.
    ///
    /// # Errors
    ///
    /// Mismatched snapshot lengths.
    pub fn reset(&mut self, observations: Vec<Observation>, actions: Vec<Action>) -> Result<()> {
        self.upsampler.reset();
        self.window.reset(observations, actions)
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Upsamples `low_res` and, on success, pushes the result (paired with
    /// `action`) into the high-resolution window.
    ///
    /// # Errors
    ///
    /// [`InferenceError`] on an under-filled window, a model failure or a
    /// mis-shaped output. The window is untouched on error.
    pub fn upsample(
        &mut self,
        low_res: &Observation,
        action: &Action,
        capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError> {
        let expected = self.history_len();
        if self.window.len() != expected {
            return Err(InferenceError::ContextLength {
                model: Self::MODEL,
                expected,
                actual: self.window.len(),
            });
        }

        let mut sample =
            self.upsampler
                .upsample(self.window.window(), low_res, action, capture_trajectory)?;
        check_sample(Self::MODEL, self.resolution(), &sample)?;
        if !capture_trajectory {
            sample.trajectory = None;
        }

        self.window.push(sample.observation.clone(), action.clone());
        Ok(sample)
    }

    /// # Errors
    ///
    /// Propagates compilation failures.
    pub fn compile(&mut self, device: &Device) -> Result<(), InferenceError> {
        self.upsampler.compile(device)
    }
}
