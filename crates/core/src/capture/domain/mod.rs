pub mod camera_device;
pub mod frame_source;
