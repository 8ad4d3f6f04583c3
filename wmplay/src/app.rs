//! Session setup: configuration to a running loop.
//!
//! Order matters and mirrors the failure modes: the configuration is checked
//! first, the device is chosen before any model exists, models are compiled
//! (when requested) before the first step, and only then is a front-end
//! opened.

use anyhow::{Context, Result};
use compute::{select_device, Device, DevicePreference, ExecutionPath, SystemProbe};
use world::builtin::{synthetic_spawn, HorizonRewardEnd, NearestUpsampler, ScrollPredictor};
use world::{
    Agent, DirectorySink, EnvOptions, EpisodeRecorder, RecordOptions, SpawnDirectory, SpawnList,
    SpawnSource, WorldModelEnv,
};

use crate::config::{Cli, PlayConfig};
use crate::game::{Clock, Frontend, Game, KeyMap, LoopReport, LoopSettings, SystemClock};
use crate::headless::HeadlessFrontend;

/// Resolves the configured device, logging every fallback step.
///
/// # Errors
///
/// Unknown preferences and unavailable explicitly requested devices.
pub fn choose_device(config: &PlayConfig) -> Result<Device> {
    let preference: DevicePreference = config.device.parse()?;
    let selection = select_device(preference, &SystemProbe)?;
    tracing::info!("compute device: {} (requested {preference})", selection.device);
    Ok(selection.device)
}

/// Built-in models for `config`, prepared for `path` on `device`.
///
/// # Errors
///
/// Model compilation failures.
pub fn build_agent(config: &PlayConfig, device: &Device, path: ExecutionPath) -> Result<Agent> {
    let model = &config.model;
    let predictor = ScrollPredictor::new(config.base_resolution, model.predictor_history, &config.schema)
        .with_denoising_steps(model.denoising_steps);
    let mut agent = Agent::new(Box::new(predictor))
        .with_reward_end(Box::new(HorizonRewardEnd::new(model.horizon, &config.schema)));
    if let Some(resolution) = config.upsampled_resolution {
        agent = agent.with_upsampler(Box::new(NearestUpsampler::new(resolution, model.upsampler_history)))?;
    }
    agent.prepare(path, device)?;
    tracing::info!(
        "agent ready: {:?} path, history {}, upsampler {}",
        path,
        agent.history_len(),
        if agent.has_upsampler() { "on" } else { "off" }
    );
    Ok(agent)
}

fn spawn_source(config: &PlayConfig) -> Result<Box<dyn SpawnSource>> {
    if let Some(dir) = &config.spawn_dir {
        return Ok(Box::new(SpawnDirectory::open(dir.clone())?));
    }
    let len = config.history_len();
    tracing::info!(
        "no spawn directory given, using {} synthetic spawn points",
        config.model.synthetic_spawns
    );
    let snapshots = (0..config.model.synthetic_spawns)
        .map(|variant| {
            synthetic_spawn(
                &config.schema,
                config.base_resolution,
                config.upsampled_resolution,
                len,
                variant,
            )
        })
        .collect();
    Ok(Box::new(SpawnList::new(snapshots)))
}

/// The recorder always has a sink so recording can be toggled at runtime;
/// `record` only decides whether it starts on.
fn recorder(config: &PlayConfig) -> EpisodeRecorder {
    let options = RecordOptions {
        store_denoising_trajectory: config.store_denoising_trajectory,
        store_original_obs: config.store_original_obs,
    };
    if config.record {
        tracing::info!("recording episodes to {}", config.recordings_dir.display());
    }
    EpisodeRecorder::new(
        Box::new(DirectorySink::new(config.recordings_dir.clone())),
        options,
        config.record,
    )
}

/// Builds the environment for an already validated configuration.
///
/// # Errors
///
/// Device, model and spawn point failures.
pub fn build_env(config: &PlayConfig) -> Result<WorldModelEnv> {
    let device = choose_device(config)?;
    let path = ExecutionPath::select(&device, config.compile);
    let agent = build_agent(config, &device, path)?;
    let env = WorldModelEnv::new(
        agent,
        config.schema.clone(),
        spawn_source(config)?,
        recorder(config),
        EnvOptions { capture_trajectory: config.record && config.store_denoising_trajectory },
    )?;
    Ok(env)
}

#[must_use]
pub fn loop_settings(config: &PlayConfig, max_ticks: Option<u64>) -> LoopSettings {
    LoopSettings {
        fps: config.fps,
        mouse_multiplier: config.mouse_multiplier,
        header: config.header,
        auto_reset: config.auto_reset,
        max_ticks,
    }
}

/// Runs one play session as described by `cli`.
///
/// # Errors
///
/// Configuration, setup and front-end failures.
pub fn run(cli: &Cli) -> Result<LoopReport> {
    let mut config = PlayConfig::from_cli(cli)?;
    config.check_args();
    config.validate()?;
    tracing::info!("playing `{}` at {} fps", config.env_id, config.fps);

    let env = build_env(&config).context("failed to set up the environment")?;
    let display = env.display_resolution();
    let keymap = KeyMap::new(&config.schema, &config.keymap);
    let mut game = Game::new(env, loop_settings(&config, cli.ticks), keymap);
    let mut clock = SystemClock::new();

    let mut frontend = open_frontend(cli, &config, display)?;
    let report = game.run(frontend.as_mut(), &mut clock as &mut dyn Clock)?;
    if let Some(median) = report.pacing.median() {
        tracing::info!(
            "median tick interval {:.1} ms (budget {:.1} ms)",
            median.as_secs_f64() * 1000.0,
            config.frame_budget().as_secs_f64() * 1000.0
        );
    }
    Ok(report)
}

fn headless_frontend(config: &PlayConfig) -> HeadlessFrontend {
    let forward = config.keymap.get("up").and_then(|keys| keys.first()).cloned();
    HeadlessFrontend::new().holding(forward)
}

#[cfg(feature = "render")]
fn open_frontend(
    cli: &Cli,
    config: &PlayConfig,
    display: world::Resolution,
) -> Result<Box<dyn Frontend>> {
    if cli.headless {
        return Ok(Box::new(headless_frontend(config)));
    }
    let title = format!("wmplay: {}", config.env_id);
    Ok(Box::new(crate::window::WindowFrontend::open(&title, display)?))
}

#[cfg(not(feature = "render"))]
fn open_frontend(
    cli: &Cli,
    config: &PlayConfig,
    _display: world::Resolution,
) -> Result<Box<dyn Frontend>> {
    if !cli.headless {
        tracing::warn!("built without the `render` feature, running headless");
    }
    Ok(Box::new(headless_frontend(config)))
}
