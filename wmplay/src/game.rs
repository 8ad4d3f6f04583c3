//! The real-time loop: input, commands, one environment step, display, pacing.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use anyhow::Result;
use world::{Action, ActionSchema, EnvState, Observation, WorldModelEnv};

/// Input gathered for one tick. Keys are named as in the key map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputFrame {
    pub held: HashSet<String>,
    /// Keys that went down since the previous tick, in order.
    pub pressed: Vec<String>,
    /// Raw pointer motion since the previous tick.
    pub pointer_delta: [f32; 2],
    /// Window closed or the player otherwise asked to leave.
    pub quit: bool,
}

pub trait InputDevice {
    /// Non-blocking; returns what happened since the previous call.
    ///
    /// # Errors
    ///
    /// Device failures end the session.
    fn poll(&mut self) -> Result<InputFrame>;
}

pub trait FrameDisplay {
    /// # Errors
    ///
    /// Display failures end the session.
    fn present(&mut self, frame: &Observation, header: Option<&str>) -> Result<()>;
}

/// Something that both reads input and shows frames, e.g. a window.
pub trait Frontend: InputDevice + FrameDisplay {}

impl<T: InputDevice + FrameDisplay> Frontend for T {}

/// Time source for pacing.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A clock that only moves when told to. Clones share the same time, so a
/// stub model can advance it to simulate inference latency.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: std::rc::Rc<std::cell::Cell<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&mut self, duration: Duration) {
        self.advance(duration);
    }
}

/// Loop commands, bound to keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Quit,
    Reset,
    ToggleRecording,
    TogglePause,
    /// Advance one step while paused.
    StepOnce,
    NextSpawn,
    ToggleHeader,
}

/// Key name to command.
#[derive(Debug, Clone)]
pub struct Bindings {
    commands: HashMap<String, Command>,
}

impl Default for Bindings {
    fn default() -> Self {
        let commands = [
            ("Escape", Command::Quit),
            ("Return", Command::Reset),
            ("R", Command::ToggleRecording),
            ("Period", Command::TogglePause),
            ("E", Command::StepOnce),
            ("Tab", Command::NextSpawn),
            ("H", Command::ToggleHeader),
        ]
        .into_iter()
        .map(|(key, command)| (key.to_string(), command))
        .collect();
        Self { commands }
    }
}

impl Bindings {
    #[must_use]
    pub fn command(&self, key: &str) -> Option<Command> {
        self.commands.get(key).copied()
    }

    /// Keys that trigger a command must not also hold a button.
    #[must_use]
    pub fn conflicts<'a>(&self, keymap: &'a KeyMap) -> Vec<&'a str> {
        keymap
            .keys()
            .filter(|key| self.commands.contains_key(*key))
            .collect()
    }

    /// Removes every command key from `keymap` and returns the removed keys.
    /// A key then either runs its command or holds a button, never both.
    pub fn claim(&self, keymap: &mut KeyMap) -> Vec<String> {
        let claimed: Vec<String> = self.conflicts(keymap).into_iter().map(str::to_string).collect();
        for key in &claimed {
            keymap.unbind(key);
        }
        claimed
    }
}

/// Maps held keys to the buttons of an action schema.
#[derive(Debug, Clone)]
pub struct KeyMap {
    /// Key name to button index.
    keys: HashMap<String, usize>,
}

impl KeyMap {
    /// Buttons not in `schema` are skipped; the config layer rejects them
    /// earlier.
    #[must_use]
    pub fn new(schema: &ActionSchema, bindings: &BTreeMap<String, Vec<String>>) -> Self {
        let mut keys = HashMap::new();
        for (button, bound) in bindings {
            if let Some(index) = schema.button_index(button) {
                for key in bound {
                    keys.insert(key.clone(), index);
                }
            }
        }
        Self { keys }
    }

    /// Stops `key` from holding any button.
    pub fn unbind(&mut self, key: &str) {
        self.keys.remove(key);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Action for this tick. Pointer motion is scaled by `mouse_multiplier`
    /// and dropped if the schema has no pointer.
    #[must_use]
    pub fn action(&self, schema: &ActionSchema, input: &InputFrame, mouse_multiplier: f32) -> Action {
        let mut action = schema.noop();
        for key in &input.held {
            if let Some(&index) = self.keys.get(key) {
                action.buttons[index] = true;
            }
        }
        if schema.pointer {
            action.pointer = input.pointer_delta.map(|d| d * mouse_multiplier);
        }
        action
    }
}

/// How the loop runs, independent of the environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub fps: u32,
    pub mouse_multiplier: f32,
    pub header: bool,
    pub auto_reset: bool,
    /// Stop after this many ticks.
    pub max_ticks: Option<u64>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            mouse_multiplier: 10.0,
            header: true,
            auto_reset: true,
            max_ticks: None,
        }
    }
}

impl LoopSettings {
    #[must_use]
    pub fn budget(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

/// Rolling window of tick-to-tick intervals.
#[derive(Debug, Clone, Default)]
pub struct PacingStats {
    intervals: VecDeque<Duration>,
}

impl PacingStats {
    const WINDOW: usize = 256;

    pub fn record(&mut self, interval: Duration) {
        if self.intervals.len() == Self::WINDOW {
            self.intervals.pop_front();
        }
        self.intervals.push_back(interval);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    #[must_use]
    pub fn median(&self) -> Option<Duration> {
        let mut sorted: Vec<Duration> = self.intervals.iter().copied().collect();
        sorted.sort_unstable();
        sorted.get(sorted.len() / 2).copied()
    }

    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        self.intervals.iter().copied().max()
    }

    /// Frames per second over the window.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fps(&self) -> Option<f64> {
        let total: Duration = self.intervals.iter().sum();
        (!total.is_zero()).then(|| self.intervals.len() as f64 / total.as_secs_f64())
    }
}

/// What a finished session did.
#[derive(Debug, Clone, Default)]
pub struct LoopReport {
    pub ticks: u64,
    pub steps: u64,
    /// Ticks whose work exceeded the frame budget.
    pub over_budget_ticks: u64,
    /// Episodes started, including the first.
    pub episodes: u64,
    /// Episodes ended by the termination signal.
    pub finished_episodes: u64,
    pub inference_failures: u64,
    pub pacing: PacingStats,
}

/// Drives a [`WorldModelEnv`] at a fixed rate.
pub struct Game {
    env: WorldModelEnv,
    settings: LoopSettings,
    keymap: KeyMap,
    bindings: Bindings,
    spawn_point: usize,
    paused: bool,
    header: bool,
    last_frame: Option<Observation>,
    last_reward: f32,
    episode_return: f32,
    report: LoopReport,
}

enum Flow {
    Continue,
    Quit,
}

impl Game {
    #[must_use]
    pub fn new(env: WorldModelEnv, settings: LoopSettings, mut keymap: KeyMap) -> Self {
        let bindings = Bindings::default();
        for key in bindings.claim(&mut keymap) {
            tracing::warn!("key `{key}` is bound to a command; it will not press a button");
        }
        Self {
            env,
            header: settings.header,
            settings,
            keymap,
            bindings,
            spawn_point: 0,
            paused: false,
            last_frame: None,
            last_reward: 0.0,
            episode_return: 0.0,
            report: LoopReport::default(),
        }
    }

    #[must_use]
    pub fn env(&self) -> &WorldModelEnv {
        &self.env
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Runs until quit or `max_ticks`, then flushes any pending recording.
    /// The flush also happens when the loop stops on an error.
    ///
    /// # Errors
    ///
    /// Front-end failures and environment errors other than inference
    /// failures, which only restart the episode.
    pub fn run(&mut self, frontend: &mut dyn Frontend, clock: &mut dyn Clock) -> Result<LoopReport> {
        let budget = self.settings.budget();
        tracing::info!(
            "starting loop at {} fps ({:.1} ms per tick)",
            self.settings.fps,
            budget.as_secs_f64() * 1000.0
        );
        let outcome = self.run_ticks(frontend, clock, budget);

        match self.env.flush_recording() {
            Ok(Some(persisted)) => tracing::info!("saved the episode in progress ({} steps)", persisted.steps),
            Ok(None) => {}
            Err(e) => tracing::error!("failed to save the episode in progress: {e}"),
        }
        if let Err(e) = &outcome {
            tracing::error!("loop stopped after {} ticks: {e:#}", self.report.ticks);
        }
        outcome?;

        tracing::info!(
            "loop finished: {} ticks, {} steps, {} over budget, {} episodes",
            self.report.ticks,
            self.report.steps,
            self.report.over_budget_ticks,
            self.report.episodes
        );
        Ok(self.report.clone())
    }

    fn run_ticks(
        &mut self,
        frontend: &mut dyn Frontend,
        clock: &mut dyn Clock,
        budget: Duration,
    ) -> Result<()> {
        self.reset()?;
        self.present(frontend)?;

        let mut previous_start: Option<Duration> = None;
        while self.settings.max_ticks.map_or(true, |max| self.report.ticks < max) {
            let start = clock.now();
            if let Some(previous) = previous_start {
                self.report.pacing.record(start.saturating_sub(previous));
            }
            previous_start = Some(start);

            if let Flow::Quit = self.tick(frontend)? {
                break;
            }
            self.report.ticks += 1;

            let elapsed = clock.now().saturating_sub(start);
            if elapsed < budget {
                clock.sleep(budget - elapsed);
            } else {
                self.report.over_budget_ticks += 1;
                tracing::debug!(
                    "tick {} over budget: {:.1} ms",
                    self.report.ticks,
                    elapsed.as_secs_f64() * 1000.0
                );
            }
        }
        Ok(())
    }

    fn tick(&mut self, frontend: &mut dyn Frontend) -> Result<Flow> {
        let input = frontend.poll()?;
        if input.quit {
            return Ok(Flow::Quit);
        }

        let mut step_once = false;
        for key in &input.pressed {
            match self.bindings.command(key) {
                Some(Command::Quit) => return Ok(Flow::Quit),
                Some(Command::Reset) => self.reset()?,
                Some(Command::ToggleRecording) => self.toggle_recording(),
                Some(Command::TogglePause) => {
                    self.paused = !self.paused;
                    tracing::info!("{}", if self.paused { "paused" } else { "resumed" });
                }
                Some(Command::StepOnce) => step_once = true,
                Some(Command::NextSpawn) => {
                    self.spawn_point = (self.spawn_point + 1) % self.env.spawn_count();
                    self.reset()?;
                }
                Some(Command::ToggleHeader) => self.header = !self.header,
                None => {}
            }
        }

        if self.env.state() == EnvState::Terminated {
            if self.settings.auto_reset {
                self.reset()?;
            }
        } else if !self.paused || step_once {
            let action = self
                .keymap
                .action(self.env.schema(), &input, self.settings.mouse_multiplier);
            self.step(&action)?;
        }

        self.present(frontend)?;
        Ok(Flow::Continue)
    }

    fn step(&mut self, action: &Action) -> Result<()> {
        match self.env.step(action) {
            Ok(outcome) => {
                self.report.steps += 1;
                self.last_reward = outcome.reward;
                self.episode_return += outcome.reward;
                self.last_frame = Some(outcome.observation);
                if outcome.end {
                    self.report.finished_episodes += 1;
                    tracing::info!(
                        "episode {} finished, return {:.2}",
                        self.env.episode(),
                        self.episode_return
                    );
                }
                Ok(())
            }
            Err(e) if e.is_inference() => {
                self.report.inference_failures += 1;
                tracing::warn!("inference failed, restarting the episode: {e}");
                self.reset()
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reset(&mut self) -> Result<()> {
        let frame = self.env.reset(self.spawn_point)?;
        self.last_frame = Some(frame);
        self.last_reward = 0.0;
        self.episode_return = 0.0;
        self.report.episodes += 1;
        Ok(())
    }

    fn toggle_recording(&mut self) {
        let enable = !self.env.recorder().is_enabled();
        match self.env.set_recording(enable) {
            Ok(flushed) => {
                let state = match (enable, self.env.recorder().is_recording()) {
                    (false, _) => "off",
                    (true, true) => "on",
                    (true, false) => "armed for the next episode",
                };
                tracing::info!("recording {state}");
                if let Some(persisted) = flushed {
                    tracing::info!("saved {} recorded steps", persisted.steps);
                }
            }
            Err(e) => tracing::error!("could not change recording: {e}"),
        }
    }

    /// Status line shown above the frame.
    #[must_use]
    pub fn header_text(&self) -> String {
        let recorder = self.env.recorder();
        let recording = if recorder.is_recording() {
            "REC"
        } else if recorder.is_enabled() {
            "rec armed"
        } else {
            "rec off"
        };
        let mut text = format!(
            "episode {} | step {} | reward {:.2} | return {:.2} | {recording}",
            self.env.episode(),
            self.env.steps_taken(),
            self.last_reward,
            self.episode_return,
        );
        if let Some(fps) = self.report.pacing.fps() {
            text.push_str(&format!(" | {fps:.1} fps"));
        }
        if self.paused {
            text.push_str(" | paused");
        }
        if self.env.state() == EnvState::Terminated {
            text.push_str(" | ended, press Return");
        }
        text
    }

    fn present(&mut self, frontend: &mut dyn Frontend) -> Result<()> {
        let Some(frame) = self.last_frame.as_ref() else {
            return Ok(());
        };
        let header = self.header.then(|| self.header_text());
        frontend.present(frame, header.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keymap_builds_actions_from_held_keys() {
        let schema = ActionSchema::racing();
        let bindings = BTreeMap::from([
            ("up".to_string(), vec!["Up".to_string(), "W".to_string()]),
            ("left".to_string(), vec!["Left".to_string()]),
        ]);
        let keymap = KeyMap::new(&schema, &bindings);
        let input = InputFrame {
            held: HashSet::from(["W".to_string(), "Left".to_string(), "Q".to_string()]),
            pointer_delta: [3.0, 1.0],
            ..InputFrame::default()
        };
        let action = keymap.action(&schema, &input, 10.0);
        assert_eq!(action, schema.action_from_held(["up", "left"]));
        assert_eq!(action.pointer, [0.0, 0.0]);
    }

    #[test]
    fn pointer_motion_is_scaled() {
        let schema = ActionSchema::new(["fire"], true);
        let keymap = KeyMap::new(&schema, &BTreeMap::new());
        let input = InputFrame { pointer_delta: [1.5, -2.0], ..InputFrame::default() };
        assert_eq!(keymap.action(&schema, &input, 10.0).pointer, [15.0, -20.0]);
    }

    #[test]
    fn median_of_recorded_intervals() {
        let mut stats = PacingStats::default();
        assert!(stats.median().is_none());
        for ms in [30, 34, 33, 100, 33] {
            stats.record(Duration::from_millis(ms));
        }
        assert_eq!(stats.median(), Some(Duration::from_millis(33)));
        assert_eq!(stats.max(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn bindings_report_conflicts() {
        let schema = ActionSchema::racing();
        let mut keymap = KeyMap::new(
            &schema,
            &BTreeMap::from([("up".to_string(), vec!["E".to_string(), "Up".to_string()])]),
        );
        let bindings = Bindings::default();
        assert_eq!(bindings.conflicts(&keymap), vec!["E"]);

        assert_eq!(bindings.claim(&mut keymap), vec!["E".to_string()]);
        assert!(bindings.conflicts(&keymap).is_empty());
        let holding_e = InputFrame {
            held: HashSet::from(["E".to_string()]),
            ..InputFrame::default()
        };
        assert!(keymap.action(&schema, &holding_e, 10.0).is_noop());
        let holding_up = InputFrame {
            held: HashSet::from(["Up".to_string()]),
            ..InputFrame::default()
        };
        assert_eq!(keymap.action(&schema, &holding_up, 10.0), schema.action_from_held(["up"]));
    }
}
