use std::time::Instant;

use image::GrayImage;
use ndarray::{s, ArrayView3};

use crate::shared::region::Region;

/// A single camera frame: contiguous pixel bytes in row-major order.
///
/// Format conversion happens at I/O boundaries only; the detection layer
/// works on the luma plane produced by [`Frame::to_luma`].
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
            captured_at: Instant::now(),
        }
    }

    /// A frame the device handed back without pixels.
    pub fn empty(index: usize) -> Self {
        Self::new(Vec::new(), 0, 0, 3, index)
    }

    pub fn with_captured_at(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the pixels under `region` into a new frame.
    ///
    /// Returns `None` when the region does not lie inside this frame.
    pub fn crop(&self, region: &Region) -> Option<Frame> {
        if region.is_empty() || !region.fits_within(self.width, self.height) {
            return None;
        }
        let (x, y) = (region.x as usize, region.y as usize);
        let (w, h) = (region.width as usize, region.height as usize);
        let view = self.as_ndarray();
        let data: Vec<u8> = view.slice(s![y..y + h, x..x + w, ..]).iter().copied().collect();
        Some(Self {
            data,
            width: region.width,
            height: region.height,
            channels: self.channels,
            index: self.index,
            captured_at: self.captured_at,
        })
    }

    /// ITU-R BT.601 luma, the weighting cascade models are trained on.
    pub fn to_luma(&self) -> GrayImage {
        let mut gray = GrayImage::new(self.width, self.height);
        if self.is_empty() {
            return gray;
        }
        let view = self.as_ndarray();
        for (x, y, pixel) in gray.enumerate_pixels_mut() {
            let (row, col) = (y as usize, x as usize);
            pixel.0[0] = if self.channels >= 3 {
                let r = view[[row, col, 0]] as f32;
                let g = view[[row, col, 1]] as f32;
                let b = view[[row, col, 2]] as f32;
                (0.299 * r + 0.587 * g + 0.114 * b).round().min(255.0) as u8
            } else {
                view[[row, col, 0]]
            };
        }
        gray
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
