use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// The pixels of one detected face, cut out of the frame it was found in.
///
/// Eye detection only ever sees a `FaceCrop`; there is no way to build one
/// that covers more than the face region.
pub struct FaceCrop {
    region: Region,
    image: Frame,
}

impl FaceCrop {
    /// Returns `None` if `region` does not lie inside `frame`.
    pub fn new(frame: &Frame, region: &Region) -> Option<Self> {
        frame.crop(region).map(|image| Self {
            region: *region,
            image,
        })
    }

    /// Where the crop sits in the source frame.
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn image(&self) -> &Frame {
        &self.image
    }
}

/// Domain interface for the cascade-style face and eye detector.
///
/// Each call is independent; `&mut self` only lets implementations reuse
/// scratch buffers.
pub trait Detector: Send {
    /// Face regions found in `frame`, in detector-defined order.
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<Region>, Box<dyn std::error::Error>>;

    /// True if at least one eye-like feature lies inside `face`.
    fn detect_eyes(&mut self, face: &FaceCrop) -> Result<bool, Box<dyn std::error::Error>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_crop_matches_region() {
        let frame = Frame::new(vec![9u8; 10 * 8 * 3], 10, 8, 3, 4);
        let region = Region::new(2, 1, 5, 6);
        let crop = FaceCrop::new(&frame, &region).unwrap();
        assert_eq!(crop.region(), &region);
        assert_eq!(crop.image().width(), 5);
        assert_eq!(crop.image().height(), 6);
        assert_eq!(crop.image().index(), 4);
    }

    #[test]
    fn test_face_crop_rejects_out_of_frame_region() {
        let frame = Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, 3, 0);
        assert!(FaceCrop::new(&frame, &Region::new(2, 2, 4, 4)).is_none());
    }
}
