//! Stand-in models for running without an external checkpoint.
//!
//! They are cheap, deterministic and action-responsive, which is enough to
//! exercise the whole loop (pacing, windows, upsampling, recording) on any
//! machine. None of them is a learned model.

use compute::Device;

use crate::action::{Action, ActionSchema};
use crate::context::ContextView;
use crate::error::InferenceError;
use crate::model::{
    DenoisingTrajectory, FramePredictor, FrameSample, RewardEnd, RewardEndModel, Upsampler,
};
use crate::observation::{Observation, Resolution, CHANNELS};
use crate::spawn::SpawnSnapshot;

/// Index of a button by name, when the schema has it.
#[derive(Debug, Clone, Copy, Default)]
struct Controls {
    up: Option<usize>,
    down: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    pointer: bool,
}

impl Controls {
    fn new(schema: &ActionSchema) -> Self {
        Self {
            up: schema.button_index("up"),
            down: schema.button_index("down"),
            left: schema.button_index("left"),
            right: schema.button_index("right"),
            pointer: schema.pointer,
        }
    }

    fn held(action: &Action, index: Option<usize>) -> bool {
        index.and_then(|i| action.buttons.get(i).copied()).unwrap_or(false)
    }

    /// Scroll direction in `-1..=1` per axis, as `(dy, dx)`.
    #[allow(clippy::cast_possible_truncation)]
    fn shift(&self, action: &Action) -> (i8, i8) {
        let axis = |neg: bool, pos: bool| i8::from(pos) - i8::from(neg);
        let mut dy = axis(Self::held(action, self.down), Self::held(action, self.up));
        let mut dx = axis(Self::held(action, self.right), Self::held(action, self.left));
        if self.pointer {
            let sign = |v: f32| if v == 0.0 { 0 } else { v.signum() as i8 };
            dx = (dx + sign(action.pointer[0])).clamp(-1, 1);
            dy = (dy + sign(action.pointer[1])).clamp(-1, 1);
        }
        (dy, dx)
    }
}

/// Source index table for one `(dy, dx)` scroll.
fn shift_table(resolution: Resolution, dy: i8, dx: i8) -> Vec<usize> {
    let (h, w) = (resolution.height, resolution.width);
    let mut table = Vec::with_capacity(h * w);
    for y in 0..h {
        for x in 0..w {
            let sy = (y + h).wrapping_add_signed(-isize::from(dy)) % h;
            let sx = (x + w).wrapping_add_signed(-isize::from(dx)) % w;
            table.push(sy * w + sx);
        }
    }
    table
}

fn blend(a: u8, b: u8, weight_a: u16) -> u8 {
    let v = (u16::from(a) * weight_a + u16::from(b) * (4 - weight_a)) / 4;
    u8::try_from(v).unwrap_or(u8::MAX)
}

/// Noise-to-frame ramp imitating a sampler's intermediate states.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn ramp_trajectory(target: &Observation, steps: usize, seed: u64) -> DenoisingTrajectory {
    let mut rng = fastrand::Rng::with_seed(seed);
    let noise: Vec<u8> = (0..target.as_bytes().len()).map(|_| rng.u8(..)).collect();
    let states = (1..=steps)
        .map(|k| {
            let t = k as f32 / steps as f32;
            let data: Vec<u8> = target
                .as_bytes()
                .iter()
                .zip(&noise)
                .map(|(&clean, &n)| (f32::from(n) * (1.0 - t) + f32::from(clean) * t).round() as u8)
                .collect();
            Observation::from_raw(target.resolution(), data).unwrap_or_else(|| target.clone())
        })
        .collect();
    DenoisingTrajectory::new(states)
}

/// Predicts the next frame by scrolling the latest frame in the steering
/// direction and blending in the average of the history.
pub struct ScrollPredictor {
    resolution: Resolution,
    history_len: usize,
    controls: Controls,
    denoising_steps: usize,
    /// Precomputed scroll tables, indexed by `(dy + 1) * 3 + (dx + 1)`.
    /// Filled by `compile`.
    tables: Option<Vec<Vec<usize>>>,
    calls: u64,
}

impl ScrollPredictor {
    #[must_use]
    pub fn new(resolution: Resolution, history_len: usize, schema: &ActionSchema) -> Self {
        Self {
            resolution,
            history_len,
            controls: Controls::new(schema),
            denoising_steps: 3,
            tables: None,
            calls: 0,
        }
    }

    #[must_use]
    pub fn with_denoising_steps(mut self, steps: usize) -> Self {
        self.denoising_steps = steps.max(1);
        self
    }

    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.tables.is_some()
    }

    fn source_index(&self, dy: i8, dx: i8, i: usize) -> usize {
        let slot = usize::try_from((dy + 1) * 3 + (dx + 1)).unwrap_or(4);
        match &self.tables {
            Some(tables) => tables[slot][i],
            None => {
                let w = self.resolution.width;
                let h = self.resolution.height;
                let (y, x) = (i / w, i % w);
                let sy = (y + h).wrapping_add_signed(-isize::from(dy)) % h;
                let sx = (x + w).wrapping_add_signed(-isize::from(dx)) % w;
                sy * w + sx
            }
        }
    }
}

impl FramePredictor for ScrollPredictor {
    fn history_len(&self) -> usize {
        self.history_len
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[allow(clippy::cast_possible_truncation)]
    fn predict(
        &mut self,
        context: ContextView<'_>,
        action: &Action,
        capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError> {
        let (latest, _) = context
            .last()
            .ok_or_else(|| InferenceError::model("scroll predictor", "empty context"))?;
        if latest.resolution() != self.resolution {
            return Err(InferenceError::model(
                "scroll predictor",
                format!("context frame is {}, expected {}", latest.resolution(), self.resolution),
            ));
        }

        let len = self.resolution.byte_len();
        let mut mean = vec![0u32; len];
        for frame in context.observations() {
            for (acc, &v) in mean.iter_mut().zip(frame.as_bytes()) {
                *acc += u32::from(v);
            }
        }
        let frames = context.len() as u32;

        let (dy, dx) = self.controls.shift(action);
        let src = latest.as_bytes();
        let mut data = vec![0u8; len];
        for pixel in 0..len / CHANNELS {
            let from = self.source_index(dy, dx, pixel);
            for c in 0..CHANNELS {
                let history = (mean[pixel * CHANNELS + c] / frames) as u8;
                data[pixel * CHANNELS + c] = blend(src[from * CHANNELS + c], history, 3);
            }
        }

        self.calls += 1;
        let observation = Observation::from_raw(self.resolution, data)
            .ok_or_else(|| InferenceError::model("scroll predictor", "output buffer size"))?;
        let trajectory = capture_trajectory
            .then(|| ramp_trajectory(&observation, self.denoising_steps, self.calls));
        Ok(FrameSample { observation, trajectory })
    }

    fn reset(&mut self) {
        self.calls = 0;
    }

    fn compile(&mut self, device: &Device) -> Result<(), InferenceError> {
        let mut tables = Vec::with_capacity(9);
        for dy in -1..=1 {
            for dx in -1..=1 {
                tables.push(shift_table(self.resolution, dy, dx));
            }
        }
        tracing::debug!("scroll predictor: {} shift tables built for {device}", tables.len());
        self.tables = Some(tables);
        Ok(())
    }
}

/// Nearest-neighbour upscaling blended with the previous high-resolution
/// frame for temporal stability.
pub struct NearestUpsampler {
    resolution: Resolution,
    history_len: usize,
}

impl NearestUpsampler {
    #[must_use]
    pub fn new(resolution: Resolution, history_len: usize) -> Self {
        Self { resolution, history_len }
    }
}

impl Upsampler for NearestUpsampler {
    fn history_len(&self) -> usize {
        self.history_len
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn upsample(
        &mut self,
        context: ContextView<'_>,
        low_res: &Observation,
        _action: &Action,
        capture_trajectory: bool,
    ) -> Result<FrameSample, InferenceError> {
        let upscaled = low_res.resize_nearest(self.resolution).ok_or_else(|| {
            InferenceError::model("nearest upsampler", format!("cannot upscale to {}", self.resolution))
        })?;
        let observation = match context.last() {
            Some((previous, _)) if previous.resolution() == self.resolution => {
                let data: Vec<u8> = upscaled
                    .as_bytes()
                    .iter()
                    .zip(previous.as_bytes())
                    .map(|(&now, &before)| blend(now, before, 3))
                    .collect();
                Observation::from_raw(self.resolution, data)
                    .ok_or_else(|| InferenceError::model("nearest upsampler", "output buffer size"))?
            }
            _ => upscaled.clone(),
        };
        let trajectory = capture_trajectory
            .then(|| DenoisingTrajectory::new(vec![upscaled, observation.clone()]));
        Ok(FrameSample { observation, trajectory })
    }
}

/// Rewards forward motion and ends the episode after a fixed number of steps.
pub struct HorizonRewardEnd {
    horizon: Option<usize>,
    forward: Option<usize>,
    steps: usize,
}

impl HorizonRewardEnd {
    /// `horizon` of `None` never ends an episode.
    #[must_use]
    pub fn new(horizon: Option<usize>, schema: &ActionSchema) -> Self {
        Self {
            horizon,
            forward: schema.button_index("up"),
            steps: 0,
        }
    }
}

impl RewardEndModel for HorizonRewardEnd {
    fn predict(
        &mut self,
        _context: ContextView<'_>,
        action: &Action,
        _next: &Observation,
    ) -> Result<RewardEnd, InferenceError> {
        self.steps += 1;
        let reward = if Controls::held(action, self.forward) { 1.0 } else { 0.0 };
        let end = self.horizon.is_some_and(|h| self.steps >= h);
        Ok(RewardEnd { reward, end })
    }

    fn reset(&mut self) {
        self.steps = 0;
    }
}

/// A procedurally drawn road scene, usable as a spawn point when no spawn
/// directory is available. `len` frames at base resolution (and at `hires`,
/// if given), all paired with the no-op action.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn synthetic_spawn(
    schema: &ActionSchema,
    base: Resolution,
    hires: Option<Resolution>,
    len: usize,
    variant: usize,
) -> SpawnSnapshot {
    let scene = |resolution: Resolution, offset: usize| {
        let (h, w) = (resolution.height, resolution.width);
        let horizon = h * 2 / 5;
        Observation::from_fn(resolution, |y, x| {
            if y < horizon {
                let tint = u8::try_from((variant * 40) % 120).unwrap_or(0);
                return [90 + tint / 2, 150, 220 - tint];
            }
            // Road narrows towards the horizon.
            let depth = (y - horizon) as f32 / (h - horizon).max(1) as f32;
            let half = (0.08 + 0.42 * depth) * w as f32;
            let centre = w as f32 / 2.0;
            let dist = (x as f32 - centre).abs();
            if dist < half {
                let stripe = (y + offset) % 8 < 4 && dist < half * 0.05;
                if stripe { [235, 235, 235] } else { [80, 80, 85] }
            } else {
                let checker = ((y + offset) / 4 + x / 6) % 2 == 0;
                if checker { [40, 140, 50] } else { [50, 160, 60] }
            }
        })
    };
    SpawnSnapshot {
        observations: (0..len).map(|i| scene(base, i)).collect(),
        actions: vec![schema.noop(); len],
        hires_observations: hires
            .map(|res| (0..len).map(|i| scene(res, i)).collect())
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ConditioningWindow;

    #[test]
    fn compiled_and_reference_paths_agree() {
        let schema = ActionSchema::racing();
        let res = Resolution::new(6, 8);
        let spawn = synthetic_spawn(&schema, res, None, 3, 0);
        let mut window = ConditioningWindow::new(3).unwrap();
        window.reset(spawn.observations, spawn.actions).unwrap();

        let mut reference = ScrollPredictor::new(res, 3, &schema);
        let mut compiled = ScrollPredictor::new(res, 3, &schema);
        compiled.compile(&Device::cpu()).unwrap();
        assert!(compiled.is_compiled());

        let action = schema.action_from_held(["up", "left"]);
        let a = reference.predict(window.window(), &action, false).unwrap();
        let b = compiled.predict(window.window(), &action, false).unwrap();
        assert_eq!(a.observation, b.observation);
        assert!(a.trajectory.is_none());
    }

    #[test]
    fn trajectory_ends_at_the_prediction() {
        let schema = ActionSchema::racing();
        let res = Resolution::new(4, 4);
        let spawn = synthetic_spawn(&schema, res, None, 2, 1);
        let mut window = ConditioningWindow::new(2).unwrap();
        window.reset(spawn.observations, spawn.actions).unwrap();
        let mut model = ScrollPredictor::new(res, 2, &schema).with_denoising_steps(4);
        let sample = model.predict(window.window(), &schema.noop(), true).unwrap();
        let trajectory = sample.trajectory.unwrap();
        assert_eq!(trajectory.len(), 4);
        assert_eq!(trajectory.states().last(), Some(&sample.observation));
    }

    #[test]
    fn horizon_ends_after_n_steps_and_resets() {
        let schema = ActionSchema::racing();
        let window = ConditioningWindow::new(1).unwrap();
        let frame = Observation::filled(Resolution::new(1, 1), [0, 0, 0]);
        let mut model = HorizonRewardEnd::new(Some(2), &schema);
        let forward = schema.action_from_held(["up"]);
        let first = model.predict(window.window(), &forward, &frame).unwrap();
        assert_eq!(first, RewardEnd { reward: 1.0, end: false });
        assert!(model.predict(window.window(), &schema.noop(), &frame).unwrap().end);
        model.reset();
        assert!(!model.predict(window.window(), &schema.noop(), &frame).unwrap().end);
    }
}
