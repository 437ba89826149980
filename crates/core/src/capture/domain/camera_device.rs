use crate::shared::frame::Frame;

/// A frame-producing device (webcam, replayed recording, ...).
///
/// Only [`FrameSource`](super::frame_source::FrameSource) talks to a device
/// directly; it serialises reads against the one-time release.
pub trait CameraDevice: Send {
    /// Reads the next frame.
    ///
    /// `Ok(None)` means the device has stopped producing frames. A frame
    /// without pixels (see [`Frame::is_empty`]) is a transient glitch, not
    /// the end of the stream.
    fn read(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>>;

    /// Gives the device back to the OS. Called at most once.
    fn release(&mut self) -> Result<(), Box<dyn std::error::Error>>;

    /// Human-readable name used in log lines.
    fn describe(&self) -> String;
}
