use std::path::PathBuf;

use lookaway_core::presentation::domain::media_clip::MediaClip;
use lookaway_core::presentation::domain::media_surface::{FrameDisplay, MediaSurface};
use lookaway_core::shared::frame::Frame;

/// Stand-in for a video window: tracks and logs what a real player would do.
#[derive(Debug, Default)]
pub struct ConsoleSurface {
    clip: Option<MediaClip>,
    visible: bool,
    playing: bool,
}

impl ConsoleSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    fn clip_name(&self) -> &str {
        self.clip.as_ref().map_or("<no media>", |c| c.name())
    }
}

impl MediaSurface for ConsoleSurface {
    fn load(&mut self, clip: &MediaClip) -> Result<(), Box<dyn std::error::Error>> {
        if !clip.path().is_file() {
            return Err(format!("media file {} not found", clip.path().display()).into());
        }
        self.clip = Some(clip.clone());
        self.playing = false;
        Ok(())
    }

    fn show(&mut self) {
        self.visible = true;
        log::info!("[media] showing {}", self.clip_name());
    }

    fn hide(&mut self) {
        self.visible = false;
        log::info!("[media] hidden");
    }

    fn play(&mut self) {
        self.playing = true;
        log::info!("[media] playing {} (looping)", self.clip_name());
    }

    fn pause(&mut self) {
        self.playing = false;
        log::info!("[media] paused");
    }

    fn stop(&mut self) {
        if self.playing {
            log::info!("[media] stopped {}", self.clip_name());
        }
        self.playing = false;
    }
}

/// Writes every `every`-th displayed frame to a PNG, overwriting the last.
/// With no path configured, frames are dropped.
pub struct SnapshotDisplay {
    path: Option<PathBuf>,
    every: usize,
    seen: usize,
    written: usize,
}

impl SnapshotDisplay {
    pub fn new(path: Option<PathBuf>, every: usize) -> Self {
        Self {
            path,
            every: every.max(1),
            seen: 0,
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl FrameDisplay for SnapshotDisplay {
    fn display(&mut self, frame: &Frame) {
        self.seen += 1;
        let Some(path) = &self.path else {
            return;
        };
        if (self.seen - 1) % self.every != 0 || frame.is_empty() {
            return;
        }
        let pixels = frame.data().to_vec();
        let Some(img) = image::RgbImage::from_raw(frame.width(), frame.height(), pixels) else {
            log::warn!("Frame #{} is not RGB; snapshot skipped", frame.index());
            return;
        };
        match img.save(path) {
            Ok(()) => self.written += 1,
            Err(e) => log::warn!("Failed to write snapshot {}: {e}", path.display()),
        }
    }
}
