pub mod media_clip;
pub mod media_surface;
pub mod playback_controller;
