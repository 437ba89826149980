use crate::detection::domain::detection_result::{DetectionResult, EyeCheck, FaceObservation};
use crate::detection::domain::detector::{Detector, FaceCrop};
use crate::shared::frame::Frame;

/// Runs face detection on `frame`, then eye detection inside each face.
///
/// Eye detection only ever receives the cropped face, never the whole
/// frame. The scan stops at the first face with eyes; the remaining faces
/// are recorded as [`EyeCheck::NotEvaluated`]. When no face has eyes, every
/// face is checked.
pub fn scan(
    detector: &mut dyn Detector,
    frame: &Frame,
) -> Result<DetectionResult, Box<dyn std::error::Error>> {
    let faces = detector.detect_faces(frame)?;
    let mut observations = Vec::with_capacity(faces.len());
    let mut attentive = false;

    for region in faces {
        let eyes = if attentive {
            EyeCheck::NotEvaluated
        } else {
            match FaceCrop::new(frame, &region) {
                Some(crop) if detector.detect_eyes(&crop)? => {
                    attentive = true;
                    EyeCheck::Found
                }
                Some(_) => EyeCheck::NotFound,
                None => {
                    log::debug!(
                        "Dropping face {region:?} outside {}x{} frame",
                        frame.width(),
                        frame.height()
                    );
                    continue;
                }
            }
        };
        observations.push(FaceObservation { region, eyes });
    }

    Ok(DetectionResult::new(observations))
}
