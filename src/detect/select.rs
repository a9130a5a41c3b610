use crate::error::EstimationError;

use super::result::Detection;

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Decides which detection, if any, is the reference object.
///
/// Exactly one candidate must survive filtering. None is `NoObjectDetected`,
/// several is `AmbiguousDetection`.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionPolicy {
    pub min_confidence: f64,
    /// Only detections with this label (case-insensitive) count when set.
    pub expected_label: Option<String>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            expected_label: None,
        }
    }
}

impl SelectionPolicy {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.expected_label = Some(label.into());
        self
    }

    fn accepts(&self, detection: &Detection) -> bool {
        if detection.confidence < self.min_confidence {
            return false;
        }
        match (&self.expected_label, &detection.label) {
            (Some(expected), Some(label)) => expected.eq_ignore_ascii_case(label),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    pub fn select(&self, detections: Vec<Detection>) -> Result<Detection, EstimationError> {
        let mut candidates = Vec::with_capacity(1);
        for detection in detections {
            if !detection.is_valid() {
                log::warn!(
                    "discarding degenerate detection from locator: {:?}",
                    detection.bbox
                );
                continue;
            }
            if self.accepts(&detection) {
                candidates.push(detection);
            }
        }
        match candidates.len() {
            0 => Err(EstimationError::NoObjectDetected),
            1 => Ok(candidates.remove(0)),
            n => Err(EstimationError::AmbiguousDetection { candidates: n }),
        }
    }
}
