#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use wmplay::game::{Game, KeyMap, LoopSettings, ManualClock};
use world::builtin::HorizonRewardEnd;
use world::{
    Action, ActionSchema, Agent, ContextView, EnvOptions, EpisodeRecorder, FramePredictor,
    FrameSample, InferenceError, Observation, Resolution, SpawnList, SpawnSnapshot, WorldModelEnv,
};

pub const RES: Resolution = Resolution::new(4, 4);

/// Echoes the last frame, taking `latency` of simulated time per call.
pub struct SlowPredictor {
    pub clock: ManualClock,
    pub latency: Duration,
    pub fail_on: Option<usize>,
    calls: usize,
}

impl SlowPredictor {
    pub fn new(clock: ManualClock, latency: Duration) -> Self {
        Self { clock, latency, fail_on: None, calls: 0 }
    }
}

impl FramePredictor for SlowPredictor {
    fn history_len(&self) -> usize {
        2
    }

    fn resolution(&self) -> Resolution {
        RES
    }

    fn predict(
        &mut self,
        context: ContextView<'_>,
        _action: &Action,
        _capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError> {
        self.clock.advance(self.latency);
        let call = self.calls;
        self.calls += 1;
        if self.fail_on == Some(call) {
            return Err(InferenceError::model("slow predictor", "injected failure"));
        }
        let (last, _) = context.last().ok_or_else(|| InferenceError::model("slow predictor", "empty"))?;
        Ok(FrameSample::new(last.clone()))
    }
}

pub fn spawn(schema: &ActionSchema) -> SpawnSnapshot {
    SpawnSnapshot {
        observations: vec![Observation::filled(RES, [10, 20, 30]); 2],
        actions: vec![schema.noop(); 2],
        hires_observations: Vec::new(),
    }
}

pub fn env(predictor: SlowPredictor, horizon: Option<usize>, recorder: EpisodeRecorder) -> WorldModelEnv {
    let schema = ActionSchema::racing();
    let agent = Agent::new(Box::new(predictor))
        .with_reward_end(Box::new(HorizonRewardEnd::new(horizon, &schema)));
    WorldModelEnv::new(
        agent,
        schema.clone(),
        Box::new(SpawnList::new(vec![spawn(&schema), spawn(&schema)])),
        recorder,
        EnvOptions::default(),
    )
    .unwrap()
}

pub fn keymap() -> KeyMap {
    let bindings = BTreeMap::from([
        ("up".to_string(), vec!["Up".to_string()]),
        ("left".to_string(), vec!["Left".to_string()]),
    ]);
    KeyMap::new(&ActionSchema::racing(), &bindings)
}

pub fn game(env: WorldModelEnv, fps: u32, ticks: u64, auto_reset: bool) -> Game {
    let settings = LoopSettings {
        fps,
        auto_reset,
        max_ticks: Some(ticks),
        ..LoopSettings::default()
    };
    Game::new(env, settings, keymap())
}
