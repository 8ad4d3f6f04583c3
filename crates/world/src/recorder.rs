//! Opt-in episode recording.
//!
//! The recorder is a tagged variant rather than a flag: only the `Recording`
//! state owns a buffer, so with recording off there is nowhere for steps to
//! accumulate. A buffer always starts at an episode start, which keeps every
//! flushed episode complete and gap-free from its reset onwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::RecordingError;
use crate::model::DenoisingTrajectory;
use crate::observation::Observation;

/// One step of an episode as handed to the recorder.
#[derive(Debug, Clone)]
pub struct StepRecord {
    /// Position within the episode, starting at 0 after each reset.
    pub index: usize,
    /// Displayed observation (upsampled when an upsampler is present).
    pub observation: Observation,
    /// Base-resolution observation before upsampling.
    pub original_observation: Option<Observation>,
    pub action: Action,
    pub reward: f32,
    pub end: bool,
    pub trajectory: Option<DenoisingTrajectory>,
}

#[derive(Debug, Clone, Default)]
pub struct EpisodeRecord {
    pub spawn_point: Option<usize>,
    pub steps: Vec<StepRecord>,
}

impl EpisodeRecord {
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Where a sink put a flushed episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedEpisode {
    pub id: u64,
    pub steps: usize,
    pub location: Option<PathBuf>,
}

/// Storage for flushed episodes.
pub trait EpisodeSink {
    /// Persists one complete episode.
    ///
    /// # Errors
    ///
    /// Storage failures.
    fn persist(&mut self, episode: &EpisodeRecord) -> Result<PersistedEpisode, RecordingError>;
}

/// What is kept besides the displayed observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordOptions {
    pub store_denoising_trajectory: bool,
    pub store_original_obs: bool,
}

#[derive(Debug)]
enum Mode {
    Disabled,
    /// Enabled; buffering starts with the next episode.
    Pending,
    Recording(EpisodeRecord),
}

pub struct EpisodeRecorder {
    mode: Mode,
    sink: Option<Box<dyn EpisodeSink>>,
    options: RecordOptions,
}

impl EpisodeRecorder {
    /// A recorder that can never record. Toggling it on is refused.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            mode: Mode::Disabled,
            sink: None,
            options: RecordOptions::default(),
        }
    }

    /// A recorder writing to `sink`. When `enabled`, buffering begins at the
    /// next [`EpisodeRecorder::begin_episode`].
    #[must_use]
    pub fn new(sink: Box<dyn EpisodeSink>, options: RecordOptions, enabled: bool) -> Self {
        Self {
            mode: if enabled { Mode::Pending } else { Mode::Disabled },
            sink: Some(sink),
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> RecordOptions {
        self.options
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, Mode::Disabled)
    }

    /// True while steps are actually being buffered.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        matches!(self.mode, Mode::Recording(_))
    }

    #[must_use]
    pub fn buffered_steps(&self) -> usize {
        match &self.mode {
            Mode::Recording(episode) => episode.len(),
            Mode::Disabled | Mode::Pending => 0,
        }
    }

    /// Starts a fresh buffer. Anything still buffered from the previous
    /// episode is discarded.
    pub fn begin_episode(&mut self, spawn_point: Option<usize>) {
        match &mut self.mode {
            Mode::Disabled => {}
            Mode::Pending => {
                self.mode = Mode::Recording(EpisodeRecord { spawn_point, steps: Vec::new() });
            }
            Mode::Recording(episode) => {
                if !episode.is_empty() {
                    tracing::info!("discarding {} unflushed recorded steps", episode.len());
                }
                *episode = EpisodeRecord { spawn_point, steps: Vec::new() };
            }
        }
    }

    /// Buffers one step; a no-op unless recording. Trajectories and original
    /// observations are dropped unless the matching store option is set.
    pub fn record_step(&mut self, mut record: StepRecord) {
        let Mode::Recording(episode) = &mut self.mode else {
            return;
        };
        if !self.options.store_denoising_trajectory {
            record.trajectory = None;
        }
        if !self.options.store_original_obs {
            record.original_observation = None;
        }
        episode.steps.push(record);
    }

    /// Persists and clears the buffer. A flushed episode is closed: the
    /// recorder waits for the next episode before buffering again.
    /// Flushing an empty buffer does nothing.
    ///
    /// # Errors
    ///
    /// Sink failures. The buffer is kept so the caller may retry or discard.
    pub fn flush(&mut self) -> Result<Option<PersistedEpisode>, RecordingError> {
        let Mode::Recording(episode) = &self.mode else {
            return Ok(None);
        };
        if episode.is_empty() {
            return Ok(None);
        }
        let Some(sink) = self.sink.as_mut() else {
            return Ok(None);
        };
        let persisted = sink.persist(episode)?;
        tracing::info!(
            "recorded episode {} ({} steps){}",
            persisted.id,
            persisted.steps,
            persisted
                .location
                .as_ref()
                .map(|p| format!(" to {}", p.display()))
                .unwrap_or_default()
        );
        self.mode = Mode::Pending;
        Ok(Some(persisted))
    }

    /// Clears the buffer without persisting.
    pub fn discard(&mut self) {
        if let Mode::Recording(episode) = &mut self.mode {
            episode.steps.clear();
        }
    }

    /// Turns recording on or off. Turning it on mid-episode (`episode_fresh`
    /// false) arms it for the next episode. Turning it off flushes a
    /// non-empty buffer first; it never silently discards.
    ///
    /// Returns the flushed episode, if any.
    ///
    /// # Errors
    ///
    /// Sink failures while flushing; recording stays on in that case.
    pub fn set_enabled(
        &mut self,
        enabled: bool,
        episode_fresh: bool,
        spawn_point: Option<usize>,
    ) -> Result<Option<PersistedEpisode>, RecordingError> {
        match (enabled, self.is_enabled()) {
            (true, false) => {
                if self.sink.is_none() {
                    tracing::warn!("recording requested but no recording sink is configured");
                    return Ok(None);
                }
                self.mode = if episode_fresh {
                    Mode::Recording(EpisodeRecord { spawn_point, steps: Vec::new() })
                } else {
                    tracing::info!("recording armed; it starts with the next episode");
                    Mode::Pending
                };
                Ok(None)
            }
            (false, true) => {
                let flushed = self.flush()?;
                self.mode = Mode::Disabled;
                Ok(flushed)
            }
            _ => Ok(None),
        }
    }
}

/// Keeps flushed episodes in memory. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    episodes: Arc<Mutex<Vec<EpisodeRecord>>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn episodes(&self) -> Vec<EpisodeRecord> {
        self.episodes.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.episodes.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EpisodeSink for MemorySink {
    fn persist(&mut self, episode: &EpisodeRecord) -> Result<PersistedEpisode, RecordingError> {
        let mut episodes = self.episodes.lock();
        episodes.push(episode.clone());
        Ok(PersistedEpisode {
            id: episodes.len() as u64,
            steps: episode.len(),
            location: None,
        })
    }
}

const EPISODE_PREFIX: &str = "episode_";
const MANIFEST: &str = "episode.json";

/// Metadata written next to the frames of a persisted episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeManifest {
    pub id: u64,
    pub recorded_at: String,
    pub spawn_point: Option<usize>,
    pub num_steps: usize,
    pub steps: Vec<StepManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepManifest {
    pub index: usize,
    pub action: Action,
    pub reward: f32,
    pub end: bool,
    pub frame: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub denoising: Vec<String>,
}

impl EpisodeManifest {
    /// # Errors
    ///
    /// I/O and JSON failures.
    pub fn load(episode_dir: &Path) -> Result<Self, RecordingError> {
        let path = episode_dir.join(MANIFEST);
        let bytes = fs::read(&path).map_err(|source| RecordingError::Io { path, source })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Writes each episode to `<root>/episode_NNNNNN/`.
///
/// Frames are PNGs under `frames/`, optional pre-upsample frames under
/// `original/` and denoising states under `denoising/<step>/`; `episode.json`
/// lists every step in order. An episode is assembled in a `.partial`
/// directory and renamed into place, so a directory without that suffix is
/// always complete.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
    next_id: Option<u64>,
}

impl DirectorySink {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), next_id: None }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Continues numbering after the highest existing episode.
    fn allocate_id(&mut self) -> Result<u64, RecordingError> {
        let id = match self.next_id {
            Some(id) => id,
            None => {
                let highest = match fs::read_dir(&self.root) {
                    Ok(entries) => entries
                        .filter_map(std::result::Result::ok)
                        .filter_map(|e| {
                            e.file_name()
                                .to_str()
                                .and_then(|n| n.strip_prefix(EPISODE_PREFIX))
                                .and_then(|n| n.parse::<u64>().ok())
                        })
                        .max()
                        .unwrap_or(0),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                    Err(source) => {
                        return Err(RecordingError::Io { path: self.root.clone(), source })
                    }
                };
                highest + 1
            }
        };
        self.next_id = Some(id + 1);
        Ok(id)
    }
}

fn create_dir(path: &Path) -> Result<(), RecordingError> {
    fs::create_dir_all(path).map_err(|source| RecordingError::Io { path: path.to_path_buf(), source })
}

fn write_frame(dir: &Path, name: &str, observation: &Observation) -> Result<(), RecordingError> {
    let path = dir.join(name);
    observation
        .save_png(&path)
        .map_err(|source| RecordingError::Image { path, source })
}

/// Removes a staging directory left behind by an interrupted write.
fn clear_staging(staging: &Path) -> Result<(), RecordingError> {
    match fs::remove_dir_all(staging) {
        Ok(()) => {
            tracing::warn!("removed stale staging directory {}", staging.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RecordingError::Io { path: staging.to_path_buf(), source }),
    }
}

/// Writes frames and `episode.json` for `episode` into `staging`.
fn write_staged(staging: &Path, id: u64, episode: &EpisodeRecord) -> Result<(), RecordingError> {
    let frames_dir = staging.join("frames");
    create_dir(&frames_dir)?;

    let mut steps = Vec::with_capacity(episode.len());
    for step in &episode.steps {
        let file = format!("{:06}.png", step.index);
        write_frame(&frames_dir, &file, &step.observation)?;

        let original = match &step.original_observation {
            Some(obs) => {
                let dir = staging.join("original");
                create_dir(&dir)?;
                write_frame(&dir, &file, obs)?;
                Some(format!("original/{file}"))
            }
            None => None,
        };

        let mut denoising = Vec::new();
        if let Some(trajectory) = &step.trajectory {
            let rel = format!("denoising/{:06}", step.index);
            let dir = staging.join(&rel);
            create_dir(&dir)?;
            for (k, state) in trajectory.states().iter().enumerate() {
                let state_file = format!("{k:03}.png");
                write_frame(&dir, &state_file, state)?;
                denoising.push(format!("{rel}/{state_file}"));
            }
        }

        steps.push(StepManifest {
            index: step.index,
            action: step.action.clone(),
            reward: step.reward,
            end: step.end,
            frame: format!("frames/{file}"),
            original,
            denoising,
        });
    }

    let manifest = EpisodeManifest {
        id,
        recorded_at: chrono::Utc::now().to_rfc3339(),
        spawn_point: episode.spawn_point,
        num_steps: steps.len(),
        steps,
    };
    let manifest_path = staging.join(MANIFEST);
    let json = serde_json::to_vec_pretty(&manifest)?;
    fs::write(&manifest_path, json)
        .map_err(|source| RecordingError::Io { path: manifest_path, source })
}

impl EpisodeSink for DirectorySink {
    fn persist(&mut self, episode: &EpisodeRecord) -> Result<PersistedEpisode, RecordingError> {
        let id = self.allocate_id()?;
        let name = format!("{EPISODE_PREFIX}{id:06}");
        let staging = self.root.join(format!("{name}.partial"));
        let target = self.root.join(&name);

        clear_staging(&staging)?;
        let written = write_staged(&staging, id, episode).and_then(|()| {
            fs::rename(&staging, &target)
                .map_err(|source| RecordingError::Io { path: target.clone(), source })
        });
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::debug!("could not remove {}: {cleanup}", staging.display());
            }
            return Err(e);
        }

        Ok(PersistedEpisode {
            id,
            steps: episode.len(),
            location: Some(target),
        })
    }
}
