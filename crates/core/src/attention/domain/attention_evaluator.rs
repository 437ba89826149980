use crate::detection::domain::detection_result::DetectionResult;

/// Reduces one frame's detection result to the attention signal.
///
/// Attentive means at least one face was found and at least one face had
/// eyes. No faces, or faces without eyes, is non-attentive.
pub fn evaluate(result: &DetectionResult) -> bool {
    result.observations().iter().any(|face| face.eye_found())
}
