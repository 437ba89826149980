use opencv::core::Mat;
use opencv::imgproc;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};

use crate::capture::domain::camera_device::CameraDevice;
use crate::capture::domain::frame_source::{FrameSource, OpenError};
use crate::shared::frame::Frame;

/// Webcam access through OpenCV's `VideoCapture`.
pub struct OpenCvCamera {
    index: i32,
    capture: VideoCapture,
    next_index: usize,
}

// Safety: the capture handle is only ever used by the thread that currently
// owns the camera (serialised by `FrameSource`'s device lock).
unsafe impl Send for OpenCvCamera {}

impl OpenCvCamera {
    pub fn open(index: i32) -> Result<Self, OpenError> {
        let capture = VideoCapture::new(index, videoio::CAP_ANY).map_err(|e| OpenError::Camera {
            index,
            reason: e.to_string(),
        })?;
        if !capture.is_opened().unwrap_or(false) {
            return Err(OpenError::Camera {
                index,
                reason: "device not available".into(),
            });
        }
        Ok(Self {
            index,
            capture,
            next_index: 0,
        })
    }
}

/// Opens camera `index` and wraps it in a [`FrameSource`].
pub fn open_camera(index: i32) -> Result<FrameSource, OpenError> {
    FrameSource::open(index, OpenCvCamera::open)
}

impl CameraDevice for OpenCvCamera {
    fn read(&mut self) -> Result<Option<Frame>, Box<dyn std::error::Error>> {
        let mut bgr = Mat::default();
        if !self.capture.read(&mut bgr)? {
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index += 1;

        if bgr.empty() {
            return Ok(Some(Frame::empty(index)));
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&bgr, &mut rgb, imgproc::COLOR_BGR2RGB)?;
        let width = rgb.cols() as u32;
        let height = rgb.rows() as u32;
        let data = rgb.data_bytes()?.to_vec();
        Ok(Some(Frame::new(data, width, height, 3, index)))
    }

    fn release(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.capture.release()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("camera {}", self.index)
    }
}
