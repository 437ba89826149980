use std::path::{Path, PathBuf};

use crate::capture::domain::camera_device::CameraDevice;
use crate::capture::domain::frame_source::OpenError;
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;

/// Replays the images of a directory as if they came from a camera.
///
/// Files are played in file-name order. A file that fails to decode yields
/// an empty frame rather than ending the stream, mirroring a webcam that
/// occasionally hands back a blank buffer.
pub struct ImageSequenceSource {
    dir: PathBuf,
    paths: Vec<PathBuf>,
    position: usize,
    looping: bool,
    next_index: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, looping: bool) -> Result<Self, OpenError> {
        let entries = std::fs::read_dir(dir).map_err(|source| OpenError::ReplayDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_image(path))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(OpenError::EmptyReplay(dir.to_path_buf()));
        }

        log::debug!("Replaying {} images from {}", paths.len(), dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            paths,
            position: 0,
            looping,
            next_index: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl CameraDevice for ImageSequenceSource {
    fn read(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        if self.paths.is_empty() {
            return Ok(None);
        }
        if self.position >= self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.position = 0;
        }
        let path = &self.paths[self.position];
        self.position += 1;

        let index = self.next_index;
        self.next_index += 1;

        match image::open(path) {
            Ok(img) => {
                let rgb = img.to_rgb8();
                let (width, height) = rgb.dimensions();
                Ok(Some(Frame::new(rgb.into_raw(), width, height, 3, index)))
            }
            Err(e) => {
                log::trace!("Unreadable replay frame {}: {e}", path.display());
                Ok(Some(Frame::empty(index)))
            }
        }
    }

    fn release(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.paths.clear();
        self.position = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("image replay {}", self.dir.display())
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
