use std::path::Path;

use opencv::core::{Mat, Rect, Size, Vector};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;

use crate::detection::domain::detector::{Detector, FaceCrop};
use crate::shared::frame::Frame;
use crate::shared::region::Region;

/// Face and eye detection through OpenCV's own `CascadeClassifier`.
pub struct OpenCvCascadeDetector {
    face: CascadeClassifier,
    eye: CascadeClassifier,
}

// Safety: each classifier is only used through `&mut self`, one thread at a time.
unsafe impl Send for OpenCvCascadeDetector {}

impl OpenCvCascadeDetector {
    pub fn load(face_path: &Path, eye_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            face: load_classifier(face_path)?,
            eye: load_classifier(eye_path)?,
        })
    }
}

fn load_classifier(path: &Path) -> Result<CascadeClassifier, Box<dyn std::error::Error>> {
    let classifier = CascadeClassifier::new(&path.to_string_lossy())?;
    if classifier.empty()? {
        return Err(format!("OpenCV could not load cascade {}", path.display()).into());
    }
    Ok(classifier)
}

fn gray_mat(frame: &Frame) -> Result<Mat, Box<dyn std::error::Error>> {
    let luma = frame.to_luma();
    let (rows, cols) = (luma.height() as i32, luma.width() as i32);
    let mat = Mat::new_rows_cols_with_data(rows, cols, luma.as_raw())?;
    Ok(mat.try_clone()?)
}

fn detect(
    classifier: &mut CascadeClassifier,
    gray: &Mat,
) -> Result<Vector<Rect>, Box<dyn std::error::Error>> {
    let mut found = Vector::<Rect>::new();
    classifier.detect_multi_scale(gray, &mut found, 1.1, 3, 0, Size::new(0, 0), Size::new(0, 0))?;
    Ok(found)
}

impl Detector for OpenCvCascadeDetector {
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<Region>, Box<dyn std::error::Error>> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let gray = gray_mat(frame)?;
        let faces = detect(&mut self.face, &gray)?;
        Ok(faces
            .iter()
            .filter_map(|r| {
                Region::clamped(
                    r.x as i64,
                    r.y as i64,
                    r.width as i64,
                    r.height as i64,
                    frame.width(),
                    frame.height(),
                )
            })
            .collect())
    }

    fn detect_eyes(&mut self, face: &FaceCrop) -> Result<bool, Box<dyn std::error::Error>> {
        let gray = gray_mat(face.image())?;
        Ok(!detect(&mut self.eye, &gray)?.is_empty())
    }
}
