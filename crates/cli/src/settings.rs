use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lookaway_core::presentation::domain::media_clip::MediaClip;
use lookaway_core::shared::constants::{
    DEFAULT_CONFIRM_FRAMES, DEFAULT_DEVICE_INDEX, DEFAULT_FRAME_INTERVAL, DEFAULT_QUEUE_CAPACITY,
};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("settings file {0} does not exist")]
    Missing(PathBuf),
    #[error("failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntry {
    pub name: String,
    pub path: PathBuf,
}

impl From<&MediaEntry> for MediaClip {
    fn from(entry: &MediaEntry) -> Self {
        MediaClip::new(entry.name.clone(), entry.path.clone())
    }
}

/// Persistent defaults; every field can be overridden on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub device_index: i32,
    pub face_cascade: Option<PathBuf>,
    pub eye_cascade: Option<PathBuf>,
    pub frame_interval_ms: u64,
    pub confirm_frames: u32,
    pub queue_capacity: usize,
    pub media: Vec<MediaEntry>,
    pub selected_media: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_index: DEFAULT_DEVICE_INDEX,
            face_cascade: None,
            eye_cascade: None,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL.as_millis() as u64,
            confirm_frames: DEFAULT_CONFIRM_FRAMES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            media: Vec::new(),
            selected_media: None,
        }
    }
}

impl Settings {
    /// `<config_dir>/Lookaway/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("Lookaway").join("settings.json"))
    }

    /// Loads `explicit` if given (it must exist), otherwise the default
    /// location, falling back to defaults when that file is absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        match explicit {
            Some(path) if !path.exists() => Err(SettingsError::Missing(path.to_path_buf())),
            Some(path) => Self::load_from(path),
            None => match Self::default_path() {
                Some(path) => Self::load_from(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// A missing file yields defaults; an unreadable or malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No settings at {}; using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let settings = serde_json::from_str(&json).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }
}
