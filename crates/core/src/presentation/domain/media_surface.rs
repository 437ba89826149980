use crate::presentation::domain::media_clip::MediaClip;
use crate::shared::frame::Frame;

/// The window (or stand-in) that plays the diversion media.
///
/// Driven only from the presentation thread, so implementations need not be
/// `Send`.
pub trait MediaSurface {
    /// Prepares `clip` for looping playback without showing it.
    fn load(&mut self, clip: &MediaClip) -> Result<(), Box<dyn std::error::Error>>;
    fn show(&mut self);
    fn hide(&mut self);
    /// Starts or resumes playback; loops until paused or stopped.
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
}

/// Where the most recent camera frame is shown.
pub trait FrameDisplay {
    fn display(&mut self, frame: &Frame);
}
