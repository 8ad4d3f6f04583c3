//! The interactive stepping environment.
//!
//! [`WorldModelEnv`] owns the conditioning windows, the model adapters and the
//! recorder, and exposes the `reset` / `step` contract the loop controller
//! drives:
//!
//! ```text
//! Uninitialized --reset--> Ready --step--> Stepping --step (end)--> Terminated
//!                            ^                                         |
//!                            +------------------reset------------------+
//! ```
//!
//! The base window is only pushed after the predictor succeeds, and the
//! upsampler window only after the upsampler succeeds. Any inference failure
//! closes the episode; the caller recovers with `reset`.

use crate::action::{Action, ActionSchema};
use crate::agent::Agent;
use crate::context::{ConditioningWindow, ContextView};
use crate::error::{Result, WorldError};
use crate::model::{DenoisingTrajectory, FramePredictorAdapter, UpsamplerAdapter};
use crate::observation::{Observation, Resolution};
use crate::recorder::{EpisodeRecorder, PersistedEpisode, StepRecord};
use crate::spawn::{SpawnSnapshot, SpawnSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    Uninitialized,
    Ready,
    Stepping,
    Terminated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvOptions {
    /// Ask the models for denoising trajectories and return them from `step`.
    pub capture_trajectory: bool,
}

/// Result of one [`WorldModelEnv::step`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Zero-based step index within the episode.
    pub index: usize,
    /// Frame to display: upsampled if an upsampler is present.
    pub observation: Observation,
    /// Base-resolution frame straight from the predictor.
    pub raw_observation: Observation,
    pub reward: f32,
    pub end: bool,
    pub trajectory: Option<DenoisingTrajectory>,
    pub upsample_trajectory: Option<DenoisingTrajectory>,
}

pub struct WorldModelEnv {
    predictor: FramePredictorAdapter,
    upsampler: Option<UpsamplerAdapter>,
    context: ConditioningWindow,
    schema: ActionSchema,
    spawns: Box<dyn SpawnSource>,
    recorder: EpisodeRecorder,
    options: EnvOptions,
    state: EnvState,
    spawn_point: Option<usize>,
    steps_taken: usize,
    episode: u64,
}

impl WorldModelEnv {
    /// # Errors
    ///
    /// [`WorldError::Configuration`] when there are no spawn points.
    pub fn new(
        agent: Agent,
        schema: ActionSchema,
        spawns: Box<dyn SpawnSource>,
        recorder: EpisodeRecorder,
        options: EnvOptions,
    ) -> Result<Self> {
        if spawns.is_empty() {
            return Err(WorldError::Configuration("no spawn points available".to_string()));
        }
        if agent.execution_path().is_none() {
            tracing::debug!("agent was not prepared; running the reference path");
        }
        let context = ConditioningWindow::new(agent.history_len())?;
        let (predictor, upsampler) = agent.into_parts();
        tracing::info!(
            "world model env: base {} (history {}), upsampler {}, window {}",
            predictor.resolution(),
            predictor.history_len(),
            upsampler
                .as_ref()
                .map_or_else(|| "none".to_string(), |u| format!("{} (history {})", u.resolution(), u.history_len())),
            context.capacity()
        );
        Ok(Self {
            predictor,
            upsampler,
            context,
            schema,
            spawns,
            recorder,
            options,
            state: EnvState::Uninitialized,
            spawn_point: None,
            steps_taken: 0,
            episode: 0,
        })
    }

    #[must_use]
    pub fn state(&self) -> EnvState {
        self.state
    }

    #[must_use]
    pub fn schema(&self) -> &ActionSchema {
        &self.schema
    }

    #[must_use]
    pub fn context(&self) -> ContextView<'_> {
        self.context.window()
    }

    #[must_use]
    pub fn upsampler_context(&self) -> Option<ContextView<'_>> {
        self.upsampler.as_ref().map(UpsamplerAdapter::window)
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.context.capacity()
    }

    /// Resolution of the frames `step` returns for display.
    #[must_use]
    pub fn display_resolution(&self) -> Resolution {
        self.upsampler
            .as_ref()
            .map_or_else(|| self.predictor.resolution(), UpsamplerAdapter::resolution)
    }

    #[must_use]
    pub fn spawn_point(&self) -> Option<usize> {
        self.spawn_point
    }

    #[must_use]
    pub fn spawn_count(&self) -> usize {
        self.spawns.len()
    }

    #[must_use]
    pub fn describe_spawn(&self, index: usize) -> String {
        self.spawns.describe(index)
    }

    /// Steps taken since the last reset.
    #[must_use]
    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    /// Number of resets performed so far (the current episode's number).
    #[must_use]
    pub fn episode(&self) -> u64 {
        self.episode
    }

    #[must_use]
    pub fn recorder(&self) -> &EpisodeRecorder {
        &self.recorder
    }

    fn check_snapshot(&self, index: usize, snapshot: &SpawnSnapshot) -> Result<()> {
        let spawn_err = |reason: String| WorldError::Spawn { index, reason };
        if snapshot.observations.len() != snapshot.actions.len() {
            return Err(spawn_err(format!(
                "{} frames but {} actions",
                snapshot.observations.len(),
                snapshot.actions.len()
            )));
        }
        let needed = self.context.capacity();
        if snapshot.len() < needed {
            return Err(spawn_err(format!(
                "{} frames of history, the models need {needed}",
                snapshot.len()
            )));
        }
        let base = self.predictor.resolution();
        if let Some(bad) = snapshot.observations.iter().find(|o| o.resolution() != base) {
            return Err(spawn_err(format!("frame is {}, expected {base}", bad.resolution())));
        }
        for action in &snapshot.actions {
            self.schema
                .validate(action)
                .map_err(|e| spawn_err(e.to_string()))?;
        }
        if let Some(upsampler) = &self.upsampler {
            let needed = upsampler.history_len();
            if snapshot.hires_observations.len() < needed {
                return Err(spawn_err(format!(
                    "{} high-resolution frames, the upsampler needs {needed}",
                    snapshot.hires_observations.len()
                )));
            }
            let hires = upsampler.resolution();
            if let Some(bad) = snapshot.hires_observations.iter().find(|o| o.resolution() != hires) {
                return Err(spawn_err(format!(
                    "high-resolution frame is {}, expected {hires}",
                    bad.resolution()
                )));
            }
        }
        Ok(())
    }

    /// Starts a new episode from `spawn_point` and returns the frame to
    /// display before the first step.
    ///
    /// Any unflushed recording of the previous episode is discarded. The
    /// snapshot must carry enough history for every window; it is never
    /// padded. On error the environment is left as it was.
    ///
    /// # Errors
    ///
    /// [`WorldError::Spawn`] for an unknown or unusable spawn point.
    pub fn reset(&mut self, spawn_point: usize) -> Result<Observation> {
        let snapshot = self.spawns.load(spawn_point)?;
        self.check_snapshot(spawn_point, &snapshot)?;

        let SpawnSnapshot { observations, actions, hires_observations } = snapshot;
        if let Some(upsampler) = self.upsampler.as_mut() {
            let n = upsampler.history_len();
            let hires_tail = hires_observations[hires_observations.len() - n..].to_vec();
            let action_tail = actions[actions.len() - n..].to_vec();
            upsampler.reset(hires_tail, action_tail)?;
        }
        self.predictor.reset();
        self.context.reset(observations, actions)?;

        self.recorder.begin_episode(Some(spawn_point));
        self.spawn_point = Some(spawn_point);
        self.steps_taken = 0;
        self.episode += 1;
        self.state = EnvState::Ready;
        tracing::info!(
            "episode {} started from {}",
            self.episode,
            self.spawns.describe(spawn_point)
        );

        let window = self
            .upsampler
            .as_ref()
            .map_or_else(|| self.context.window(), UpsamplerAdapter::window);
        window
            .last()
            .map(|(obs, _)| obs.clone())
            .ok_or_else(|| WorldError::Spawn { index: spawn_point, reason: "empty snapshot".to_string() })
    }

    fn close_episode(&mut self) {
        self.state = EnvState::Terminated;
        self.context.clear();
        if let Some(upsampler) = self.upsampler.as_mut() {
            upsampler.clear();
        }
    }

    /// Advances the episode by one action.
    ///
    /// # Errors
    ///
    /// - [`WorldError::InvalidState`] unless `Ready` or `Stepping`.
    /// - [`WorldError::InvalidAction`] if `action` does not fit the schema;
    ///   the episode continues.
    /// - [`WorldError::Inference`] if a model fails; the episode is closed and
    ///   its recording discarded.
    pub fn step(&mut self, action: &Action) -> Result<StepOutcome> {
        if !matches!(self.state, EnvState::Ready | EnvState::Stepping) {
            return Err(WorldError::InvalidState { operation: "step", state: self.state });
        }
        self.schema.validate(action)?;

        let capture = self.options.capture_trajectory;
        let history = self.predictor.history_len();
        let predicted = self
            .predictor
            .predict(self.context.window().tail(history), action, capture);
        let prediction = match predicted {
            Ok(prediction) => prediction,
            Err(e) => return Err(self.fail_episode(e.into())),
        };
        self.context.push(prediction.observation.clone(), action.clone());

        let upsampled = self
            .upsampler
            .as_mut()
            .map(|upsampler| upsampler.upsample(&prediction.observation, action, capture));
        let (observation, upsample_trajectory) = match upsampled {
            Some(Ok(sample)) => (sample.observation, sample.trajectory),
            Some(Err(e)) => return Err(self.fail_episode(e.into())),
            None => (prediction.observation.clone(), None),
        };

        let index = self.steps_taken;
        self.steps_taken += 1;

        self.recorder.record_step(StepRecord {
            index,
            observation: observation.clone(),
            original_observation: self
                .upsampler
                .is_some()
                .then(|| prediction.observation.clone()),
            action: action.clone(),
            reward: prediction.reward,
            end: prediction.end,
            trajectory: prediction.trajectory.clone(),
        });

        if prediction.end {
            tracing::info!("episode {} ended after {} steps", self.episode, self.steps_taken);
            if let Err(e) = self.recorder.flush() {
                tracing::error!("failed to save the finished episode: {e}");
                self.recorder.discard();
            }
            self.close_episode();
        } else {
            self.state = EnvState::Stepping;
        }

        Ok(StepOutcome {
            index,
            observation,
            raw_observation: prediction.observation,
            reward: prediction.reward,
            end: prediction.end,
            trajectory: prediction.trajectory,
            upsample_trajectory,
        })
    }

    fn fail_episode(&mut self, error: WorldError) -> WorldError {
        tracing::warn!(
            "episode {} aborted at step {}: {error}",
            self.episode,
            self.steps_taken
        );
        self.recorder.discard();
        self.close_episode();
        error
    }

    /// Turns recording on or off. Turning it on before the first step of an
    /// episode records that episode; later, it starts with the next one.
    ///
    /// # Errors
    ///
    /// Sink failures while flushing on the way off.
    pub fn set_recording(&mut self, enabled: bool) -> Result<Option<PersistedEpisode>> {
        let fresh = self.state == EnvState::Ready;
        Ok(self.recorder.set_enabled(enabled, fresh, self.spawn_point)?)
    }

    /// # Errors
    ///
    /// Sink failures.
    pub fn flush_recording(&mut self) -> Result<Option<PersistedEpisode>> {
        Ok(self.recorder.flush()?)
    }

    pub fn discard_recording(&mut self) {
        self.recorder.discard();
    }
}
