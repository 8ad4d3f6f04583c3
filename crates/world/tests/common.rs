#![allow(dead_code)]

use std::path::PathBuf;

use world::{
    Action, ActionSchema, Agent, ContextView, EnvOptions, EpisodeRecorder, FramePredictor,
    FrameSample, InferenceError, Observation, Resolution, RewardEnd, RewardEndModel,
    SpawnList, SpawnSnapshot, Upsampler, WorldModelEnv,
};

pub const BASE: Resolution = Resolution::new(4, 6);
pub const HIRES: Resolution = Resolution::new(8, 12);

pub fn frame(resolution: Resolution, value: u8) -> Observation {
    Observation::filled(resolution, [value, value, value])
}

/// Frames valued `0..len`, each paired with the no-op action.
pub fn snapshot(schema: &ActionSchema, len: usize, hires: bool) -> SpawnSnapshot {
    let values = 0..u8::try_from(len).unwrap();
    SpawnSnapshot {
        observations: values.clone().map(|v| frame(BASE, v)).collect(),
        actions: vec![schema.noop(); len],
        hires_observations: if hires {
            values.map(|v| frame(HIRES, v)).collect()
        } else {
            Vec::new()
        },
    }
}

/// Emits frames valued 100, 101, ... and optionally fails on one call.
pub struct CountingPredictor {
    pub history: usize,
    pub calls: usize,
    pub fail_on: Option<usize>,
}

impl CountingPredictor {
    pub fn new(history: usize) -> Self {
        Self { history, calls: 0, fail_on: None }
    }

    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }
}

impl FramePredictor for CountingPredictor {
    fn history_len(&self) -> usize {
        self.history
    }

    fn resolution(&self) -> Resolution {
        BASE
    }

    fn predict(
        &mut self,
        context: ContextView<'_>,
        _action: &Action,
        capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError> {
        assert_eq!(context.len(), self.history);
        let call = self.calls;
        self.calls += 1;
        if self.fail_on == Some(call) {
            return Err(InferenceError::model("counting predictor", "injected failure"));
        }
        let observation = frame(BASE, 100u8.wrapping_add(u8::try_from(call % 100).unwrap()));
        let trajectory = capture_trajectory.then(|| {
            world::DenoisingTrajectory::new(vec![frame(BASE, 0), observation.clone()])
        });
        Ok(FrameSample { observation, trajectory })
    }

    fn reset(&mut self) {
        self.calls = 0;
    }
}

/// Returns the most recent context frame unchanged.
pub struct EchoPredictor {
    pub history: usize,
}

impl FramePredictor for EchoPredictor {
    fn history_len(&self) -> usize {
        self.history
    }

    fn resolution(&self) -> Resolution {
        BASE
    }

    fn predict(
        &mut self,
        context: ContextView<'_>,
        _action: &Action,
        _capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError> {
        let (last, _) = context.last().ok_or_else(|| InferenceError::model("echo", "empty"))?;
        Ok(FrameSample::new(last.clone()))
    }
}

/// Produces frames of the wrong size.
pub struct MisshapenPredictor;

impl FramePredictor for MisshapenPredictor {
    fn history_len(&self) -> usize {
        1
    }

    fn resolution(&self) -> Resolution {
        BASE
    }

    fn predict(
        &mut self,
        _context: ContextView<'_>,
        _action: &Action,
        _capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError> {
        Ok(FrameSample::new(frame(Resolution::new(2, 2), 0)))
    }
}

/// Ends the episode on the `end_at`-th step (1-based); reward is the step number.
pub struct EndAfter {
    pub end_at: usize,
    pub steps: usize,
}

impl EndAfter {
    pub fn new(end_at: usize) -> Self {
        Self { end_at, steps: 0 }
    }
}

impl RewardEndModel for EndAfter {
    fn predict(
        &mut self,
        _context: ContextView<'_>,
        _action: &Action,
        _next: &Observation,
    ) -> Result<RewardEnd, InferenceError> {
        self.steps += 1;
        Ok(RewardEnd {
            reward: self.steps as f32,
            end: self.steps >= self.end_at,
        })
    }

    fn reset(&mut self) {
        self.steps = 0;
    }
}

/// Nearest-neighbour upscaling of the low-resolution frame.
pub struct ResizeUpsampler {
    pub history: usize,
    pub fail: bool,
}

impl Upsampler for ResizeUpsampler {
    fn history_len(&self) -> usize {
        self.history
    }

    fn resolution(&self) -> Resolution {
        HIRES
    }

    fn upsample(
        &mut self,
        context: ContextView<'_>,
        low_res: &Observation,
        _action: &Action,
        _capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError> {
        assert_eq!(context.len(), self.history);
        if self.fail {
            return Err(InferenceError::model("resize upsampler", "injected failure"));
        }
        Ok(FrameSample::new(low_res.resize_nearest(HIRES).unwrap()))
    }
}

pub fn env_with(
    agent: Agent,
    spawns: Vec<SpawnSnapshot>,
    recorder: EpisodeRecorder,
) -> WorldModelEnv {
    WorldModelEnv::new(
        agent,
        ActionSchema::racing(),
        Box::new(SpawnList::new(spawns)),
        recorder,
        EnvOptions::default(),
    )
    .unwrap()
}

/// A fresh, empty scratch directory under the system temp dir.
pub fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "world-{tag}-{}-{}",
        std::process::id(),
        fastrand::u64(..)
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
