use std::time::Duration;

pub const FACE_CASCADE_NAME: &str = "haarcascade_frontalface_default.xml";
pub const EYE_CASCADE_NAME: &str = "haarcascade_eye.xml";

pub const DEFAULT_DEVICE_INDEX: i32 = 0;

/// Pause between capture iterations (~33 fps ceiling).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(30);

/// Pending attention updates the dispatcher holds before folding.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Consecutive detector failures tolerated before capture gives up (~1 second at 30 fps).
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 30;

/// Frames a changed reading must persist before it is emitted. 1 disables confirmation.
pub const DEFAULT_CONFIRM_FRAMES: u32 = 1;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
