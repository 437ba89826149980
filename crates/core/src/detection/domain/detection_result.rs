use crate::shared::region::Region;

/// Outcome of the eye check for one face.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EyeCheck {
    Found,
    NotFound,
    /// Skipped because an earlier face already had eyes.
    NotEvaluated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaceObservation {
    pub region: Region,
    pub eyes: EyeCheck,
}

impl FaceObservation {
    pub fn eye_found(&self) -> bool {
        self.eyes == EyeCheck::Found
    }
}

/// Every face detected in one frame, with its eye check.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionResult {
    observations: Vec<FaceObservation>,
}

impl DetectionResult {
    pub fn new(observations: Vec<FaceObservation>) -> Self {
        Self { observations }
    }

    /// Builds a result from `(face, eye_found)` pairs.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Region, bool)>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(region, found)| FaceObservation {
                    region,
                    eyes: if found {
                        EyeCheck::Found
                    } else {
                        EyeCheck::NotFound
                    },
                })
                .collect(),
        )
    }

    pub fn observations(&self) -> &[FaceObservation] {
        &self.observations
    }

    pub fn face_count(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// How many faces actually went through eye detection.
    pub fn eye_checks_run(&self) -> usize {
        self.observations
            .iter()
            .filter(|o| o.eyes != EyeCheck::NotEvaluated)
            .count()
    }
}
