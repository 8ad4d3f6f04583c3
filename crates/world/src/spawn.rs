//! Spawn points: the initial history an episode starts from.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::{RecordingError, Result, WorldError};
use crate::observation::Observation;

/// Initial conditioning history for one spawn point, oldest first.
#[derive(Debug, Clone, Default)]
pub struct SpawnSnapshot {
    pub observations: Vec<Observation>,
    pub actions: Vec<Action>,
    /// High-resolution frames for the upsampler window, aligned with the
    /// tail of `actions`. Empty when the spawn point has none.
    pub hires_observations: Vec<Observation>,
}

impl SpawnSnapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Writes the snapshot in the layout [`SpawnDirectory`] reads.
    ///
    /// # Errors
    ///
    /// I/O, encoding and JSON failures.
    pub fn write(&self, dir: &Path) -> Result<(), RecordingError> {
        let manifest = SpawnManifest { actions: self.actions.clone() };
        write_frames(&dir.join(FRAMES), &self.observations)?;
        if !self.hires_observations.is_empty() {
            write_frames(&dir.join(HIRES), &self.hires_observations)?;
        }
        let path = dir.join(MANIFEST);
        fs::write(&path, serde_json::to_vec_pretty(&manifest)?)
            .map_err(|source| RecordingError::Io { path, source })
    }
}

fn write_frames(dir: &Path, frames: &[Observation]) -> Result<(), RecordingError> {
    fs::create_dir_all(dir).map_err(|source| RecordingError::Io { path: dir.to_path_buf(), source })?;
    for (i, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("{i:04}.png"));
        frame
            .save_png(&path)
            .map_err(|source| RecordingError::Image { path, source })?;
    }
    Ok(())
}

/// A set of spawn points addressed by index.
pub trait SpawnSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// # Errors
    ///
    /// [`WorldError::Spawn`] for an unknown index or unreadable data.
    fn load(&self, index: usize) -> Result<SpawnSnapshot>;

    fn describe(&self, index: usize) -> String {
        format!("spawn {index}")
    }
}

/// Spawn points held in memory.
#[derive(Debug, Clone, Default)]
pub struct SpawnList {
    snapshots: Vec<SpawnSnapshot>,
}

impl SpawnList {
    #[must_use]
    pub fn new(snapshots: Vec<SpawnSnapshot>) -> Self {
        Self { snapshots }
    }
}

impl SpawnSource for SpawnList {
    fn len(&self) -> usize {
        self.snapshots.len()
    }

    fn load(&self, index: usize) -> Result<SpawnSnapshot> {
        self.snapshots.get(index).cloned().ok_or_else(|| WorldError::Spawn {
            index,
            reason: format!("only {} spawn points are loaded", self.snapshots.len()),
        })
    }
}

const MANIFEST: &str = "spawn.json";
const FRAMES: &str = "frames";
const HIRES: &str = "hires";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpawnManifest {
    actions: Vec<Action>,
}

/// Spawn points on disk, one sub-directory each:
///
/// ```text
/// <root>/<name>/spawn.json     {"actions": [...]}
/// <root>/<name>/frames/*.png   base-resolution history, sorted by name
/// <root>/<name>/hires/*.png    optional upsampler history
/// ```
///
/// Sub-directories are indexed in name order. Frames are read on each
/// [`SpawnSource::load`], not cached.
#[derive(Debug, Clone)]
pub struct SpawnDirectory {
    root: PathBuf,
    points: Vec<PathBuf>,
}

impl SpawnDirectory {
    /// # Errors
    ///
    /// [`WorldError::Configuration`] when `root` is unreadable or holds no
    /// spawn point.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let entries = fs::read_dir(&root).map_err(|e| {
            WorldError::Configuration(format!("cannot read spawn directory {}: {e}", root.display()))
        })?;
        let mut points: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.join(MANIFEST).is_file())
            .collect();
        points.sort();
        if points.is_empty() {
            return Err(WorldError::Configuration(format!(
                "spawn directory {} contains no spawn points",
                root.display()
            )));
        }
        tracing::info!("found {} spawn points in {}", points.len(), root.display());
        Ok(Self { root, points })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn read_frames(index: usize, dir: &Path) -> Result<Vec<Observation>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let spawn_err = |reason: String| WorldError::Spawn { index, reason };
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| spawn_err(format!("{}: {e}", dir.display())))?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
        .collect();
    files.sort();
    files
        .iter()
        .map(|path| {
            Observation::load_png(path).map_err(|e| spawn_err(format!("{}: {e}", path.display())))
        })
        .collect()
}

impl SpawnSource for SpawnDirectory {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn load(&self, index: usize) -> Result<SpawnSnapshot> {
        let dir = self.points.get(index).ok_or_else(|| WorldError::Spawn {
            index,
            reason: format!("only {} spawn points exist", self.points.len()),
        })?;
        let manifest_path = dir.join(MANIFEST);
        let manifest: SpawnManifest = fs::read(&manifest_path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()))
            .map_err(|reason| WorldError::Spawn {
                index,
                reason: format!("{}: {reason}", manifest_path.display()),
            })?;

        Ok(SpawnSnapshot {
            observations: read_frames(index, &dir.join(FRAMES))?,
            actions: manifest.actions,
            hires_observations: read_frames(index, &dir.join(HIRES))?,
        })
    }

    fn describe(&self, index: usize) -> String {
        self.points
            .get(index)
            .and_then(|p| p.file_name())
            .map_or_else(|| format!("spawn {index}"), |n| n.to_string_lossy().into_owned())
    }
}
