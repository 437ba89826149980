use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MediaError {
    #[error("media clip {0:?} is listed more than once")]
    DuplicateName(String),
    #[error("no media clip named {name:?} (available: {})", .available.join(", "))]
    UnknownClip { name: String, available: Vec<String> },
    #[error("media entry {0:?} is not of the form name=path")]
    BadEntry(String),
}

/// A named media file the viewer can be diverted to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaClip {
    name: String,
    path: PathBuf,
}

impl MediaClip {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Parses `name=path`.
    pub fn parse(entry: &str) -> Result<Self, MediaError> {
        match entry.split_once('=') {
            Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
                Ok(Self::new(name.trim(), path.trim()))
            }
            _ => Err(MediaError::BadEntry(entry.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The selectable clips, sorted by name.
#[derive(Clone, Debug, Default)]
pub struct MediaLibrary {
    clips: Vec<MediaClip>,
}

impl MediaLibrary {
    pub fn new(mut clips: Vec<MediaClip>) -> Result<Self, MediaError> {
        clips.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = clips.windows(2).find(|pair| pair[0].name == pair[1].name) {
            return Err(MediaError::DuplicateName(pair[1].name.clone()));
        }
        Ok(Self { clips })
    }

    /// The clip selected when nothing else is asked for: the first by name.
    pub fn default_clip(&self) -> Option<&MediaClip> {
        self.clips.first()
    }

    pub fn find(&self, name: &str) -> Result<&MediaClip, MediaError> {
        self.clips
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| MediaError::UnknownClip {
                name: name.to_string(),
                available: self.clips.iter().map(|c| c.name.clone()).collect(),
            })
    }
}
