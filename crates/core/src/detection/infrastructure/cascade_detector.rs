use std::path::Path;

use crate::detection::domain::detector::{Detector, FaceCrop};
use crate::detection::infrastructure::haar_cascade::{CascadeError, DetectionParams, HaarCascade};
use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Face and eye detection with two Haar cascades, evaluated in pure Rust.
pub struct CascadeDetector {
    face: HaarCascade,
    eye: HaarCascade,
    face_params: DetectionParams,
    eye_params: DetectionParams,
}

impl CascadeDetector {
    pub fn new(face: HaarCascade, eye: HaarCascade) -> Self {
        Self {
            face,
            eye,
            face_params: DetectionParams::default(),
            eye_params: DetectionParams::default(),
        }
    }

    pub fn load(face_path: &Path, eye_path: &Path) -> Result<Self, CascadeError> {
        let face = HaarCascade::load(face_path)?;
        let eye = HaarCascade::load(eye_path)?;
        log::info!(
            "Loaded face cascade {} and eye cascade {}",
            face_path.display(),
            eye_path.display()
        );
        Ok(Self::new(face, eye))
    }

    pub fn with_face_params(mut self, params: DetectionParams) -> Self {
        self.face_params = params;
        self
    }

    pub fn with_eye_params(mut self, params: DetectionParams) -> Self {
        self.eye_params = params;
        self
    }
}

impl Detector for CascadeDetector {
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<Region>, Box<dyn std::error::Error>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let gray = frame.to_luma();
        Ok(self.face.detect(&gray, &self.face_params))
    }

    fn detect_eyes(&mut self, face: &FaceCrop) -> Result<bool, Box<dyn std::error::Error>> {
        let gray = face.image().to_luma();
        Ok(!self.eye.detect(&gray, &self.eye_params).is_empty())
    }
}
