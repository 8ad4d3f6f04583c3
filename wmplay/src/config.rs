//! Play configuration: built-in defaults, an optional JSON file on top, and
//! command-line flags on top of that.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use world::{ActionSchema, Resolution, WorldError};

/// Command-line interface.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "wmplay", version, about = "Play a generative world model in real time")]
pub struct Cli {
    /// JSON configuration file; flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Record episodes to the recordings directory.
    #[arg(long)]
    pub record: bool,

    /// Also store each step's denoising trajectory (needs --record).
    #[arg(long)]
    pub store_denoising_trajectory: bool,

    /// Also store pre-upsampling observations (needs --record).
    #[arg(long)]
    pub store_original_obs: bool,

    /// Scale applied to raw pointer motion.
    #[arg(long)]
    pub mouse_multiplier: Option<f32>,

    /// Compile the models ahead of time (GPU only).
    #[arg(long)]
    pub compile: bool,

    /// Target frame rate.
    #[arg(long)]
    pub fps: Option<u32>,

    /// Hide the status header.
    #[arg(long)]
    pub no_header: bool,

    /// Compute device: auto, gpu, accelerator or cpu.
    #[arg(long)]
    pub device: Option<String>,

    /// Directory of spawn points; a synthetic scene is used without one.
    #[arg(long)]
    pub spawn_dir: Option<PathBuf>,

    /// Where recorded episodes are written.
    #[arg(long)]
    pub recordings_dir: Option<PathBuf>,

    /// Run without a window, holding the forward button.
    #[arg(long)]
    pub headless: bool,

    /// Stop after this many ticks.
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Wait for the reset key after an episode ends.
    #[arg(long)]
    pub no_auto_reset: bool,

    /// Log filter, e.g. `info` or `wmplay=debug,world=trace`.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Parameters of the built-in models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub predictor_history: usize,
    pub upsampler_history: usize,
    pub denoising_steps: usize,
    /// Episode length in steps; `None` never ends an episode.
    pub horizon: Option<usize>,
    /// Number of synthetic spawn points when no spawn directory is given.
    pub synthetic_spawns: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            predictor_history: 4,
            upsampler_history: 2,
            denoising_steps: 3,
            horizon: Some(1000),
            synthetic_spawns: 4,
        }
    }
}

/// Everything a play session needs, after layering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlayConfig {
    pub env_id: String,
    pub base_resolution: Resolution,
    /// Display resolution produced by the upsampler; `None` disables it.
    pub upsampled_resolution: Option<Resolution>,
    pub schema: ActionSchema,
    /// Button name to the keys that hold it.
    pub keymap: BTreeMap<String, Vec<String>>,
    pub fps: u32,
    pub mouse_multiplier: f32,
    pub record: bool,
    pub store_denoising_trajectory: bool,
    pub store_original_obs: bool,
    pub compile: bool,
    pub header: bool,
    pub device: String,
    pub spawn_dir: Option<PathBuf>,
    pub recordings_dir: PathBuf,
    pub auto_reset: bool,
    pub model: ModelConfig,
}

impl Default for PlayConfig {
    fn default() -> Self {
        let keymap = [
            ("up", ["Up", "W"]),
            ("down", ["Down", "S"]),
            ("left", ["Left", "A"]),
            ("right", ["Right", "D"]),
        ]
        .into_iter()
        .map(|(button, keys)| (button.to_string(), keys.map(str::to_string).to_vec()))
        .collect();
        Self {
            env_id: "racing".to_string(),
            base_resolution: Resolution::new(48, 64),
            upsampled_resolution: Some(Resolution::new(192, 256)),
            schema: ActionSchema::racing(),
            keymap,
            fps: 30,
            mouse_multiplier: 10.0,
            record: false,
            store_denoising_trajectory: false,
            store_original_obs: false,
            compile: false,
            header: true,
            device: "auto".to_string(),
            spawn_dir: None,
            recordings_dir: PathBuf::from("recordings"),
            auto_reset: true,
            model: ModelConfig::default(),
        }
    }
}

impl PlayConfig {
    /// Reads a JSON config; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// [`WorldError::Configuration`] for unreadable or malformed files.
    pub fn load(path: &Path) -> Result<Self, WorldError> {
        let text = fs::read_to_string(path).map_err(|e| {
            WorldError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| WorldError::Configuration(format!("{}: {e}", path.display())))
    }

    /// Defaults, then `cli.config` if given, then the flags.
    ///
    /// # Errors
    ///
    /// Config file errors.
    pub fn from_cli(cli: &Cli) -> Result<Self, WorldError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        Ok(config)
    }

    /// Flags only ever switch features on or replace values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        self.record |= cli.record;
        self.store_denoising_trajectory |= cli.store_denoising_trajectory;
        self.store_original_obs |= cli.store_original_obs;
        self.compile |= cli.compile;
        if cli.no_header {
            self.header = false;
        }
        if cli.no_auto_reset {
            self.auto_reset = false;
        }
        if let Some(m) = cli.mouse_multiplier {
            self.mouse_multiplier = m;
        }
        if let Some(fps) = cli.fps {
            self.fps = fps;
        }
        if let Some(device) = &cli.device {
            self.device.clone_from(device);
        }
        if let Some(dir) = &cli.spawn_dir {
            self.spawn_dir = Some(dir.clone());
        }
        if let Some(dir) = &cli.recordings_dir {
            self.recordings_dir.clone_from(dir);
        }
    }

    /// Store options only make sense while recording; without it they are
    /// switched off with a warning. Returns true if anything was changed.
    pub fn check_args(&mut self) -> bool {
        if self.record || !(self.store_denoising_trajectory || self.store_original_obs) {
            return false;
        }
        tracing::warn!(
            "store options (denoising trajectory: {}, original obs: {}) are ignored without --record",
            self.store_denoising_trajectory,
            self.store_original_obs
        );
        self.store_denoising_trajectory = false;
        self.store_original_obs = false;
        true
    }

    /// # Errors
    ///
    /// [`WorldError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<(), WorldError> {
        let fail = |msg: String| Err(WorldError::Configuration(msg));
        if self.env_id.trim().is_empty() {
            return fail("env_id must not be empty".to_string());
        }
        if self.fps == 0 {
            return fail("fps must be positive".to_string());
        }
        if !self.mouse_multiplier.is_finite() {
            return fail(format!("mouse_multiplier {} is not finite", self.mouse_multiplier));
        }
        if self.base_resolution.is_empty() {
            return fail(format!("base resolution {} is empty", self.base_resolution));
        }
        if let Some(up) = self.upsampled_resolution {
            if !up.covers(self.base_resolution) {
                return fail(format!(
                    "upsampled resolution {up} is smaller than the base resolution {}",
                    self.base_resolution
                ));
            }
        }
        if self.schema.buttons.is_empty() {
            return fail("the action schema has no buttons".to_string());
        }
        if let Some(unknown) = self.keymap.keys().find(|b| self.schema.button_index(b).is_none()) {
            return fail(format!("keymap binds unknown button `{unknown}`"));
        }
        if self.model.predictor_history == 0 {
            return fail("model.predictor_history must be at least 1".to_string());
        }
        if self.upsampled_resolution.is_some() && self.model.upsampler_history == 0 {
            return fail("model.upsampler_history must be at least 1".to_string());
        }
        if self.model.denoising_steps == 0 {
            return fail("model.denoising_steps must be at least 1".to_string());
        }
        if self.spawn_dir.is_none() && self.model.synthetic_spawns == 0 {
            return fail("no spawn_dir and model.synthetic_spawns is 0".to_string());
        }
        Ok(())
    }

    /// Frame budget of one tick.
    #[must_use]
    pub fn frame_budget(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }

    /// Conditioning history the spawn points must provide.
    #[must_use]
    pub fn history_len(&self) -> usize {
        if self.upsampled_resolution.is_some() {
            self.model.predictor_history.max(self.model.upsampler_history)
        } else {
            self.model.predictor_history
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PlayConfig::default().validate().unwrap();
    }

    #[test]
    fn flags_override_the_file_layer() {
        let mut config = PlayConfig { fps: 15, ..PlayConfig::default() };
        let cli = Cli::parse_from([
            "wmplay",
            "--fps",
            "60",
            "--no-header",
            "--record",
            "--device",
            "cpu",
            "--mouse-multiplier",
            "2.5",
        ]);
        config.apply_cli(&cli);
        assert_eq!(config.fps, 60);
        assert!(!config.header);
        assert!(config.record);
        assert_eq!(config.device, "cpu");
        assert!((config.mouse_multiplier - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn store_options_without_record_are_dropped() {
        let mut config = PlayConfig {
            store_original_obs: true,
            store_denoising_trajectory: true,
            ..PlayConfig::default()
        };
        assert!(config.check_args());
        assert!(!config.store_original_obs && !config.store_denoising_trajectory);

        let mut recording = PlayConfig { record: true, store_original_obs: true, ..PlayConfig::default() };
        assert!(!recording.check_args());
        assert!(recording.store_original_obs);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let cases = [
            PlayConfig { fps: 0, ..PlayConfig::default() },
            PlayConfig { env_id: " ".to_string(), ..PlayConfig::default() },
            PlayConfig { base_resolution: Resolution::new(0, 64), ..PlayConfig::default() },
            PlayConfig {
                upsampled_resolution: Some(Resolution::new(8, 8)),
                ..PlayConfig::default()
            },
            PlayConfig {
                keymap: BTreeMap::from([("jump".to_string(), vec!["Space".to_string()])]),
                ..PlayConfig::default()
            },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(WorldError::Configuration(_))), "{config:?}");
        }
    }

    #[test]
    fn partial_json_takes_defaults() {
        let config: PlayConfig =
            serde_json::from_str(r#"{"fps": 12, "model": {"horizon": null}}"#).unwrap();
        assert_eq!(config.fps, 12);
        assert_eq!(config.model.horizon, None);
        assert_eq!(config.model.predictor_history, 4);
        assert_eq!(config.schema, ActionSchema::racing());
        assert!(serde_json::from_str::<PlayConfig>(r#"{"fsp": 12}"#).is_err());
    }
}
