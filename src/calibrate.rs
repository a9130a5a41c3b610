use std::sync::Arc;

use crate::error::EstimationError;
use crate::frame::ImageFrame;
use crate::geometry::{focal_length_px, require_positive};
use crate::locate::ReferenceLocator;
use crate::profile::{now_epoch_s, CalibrationProfile};

/// Establishes a focal length from a reference object at a known distance.
#[derive(Clone)]
pub struct Calibrator {
    locator: ReferenceLocator,
}

impl Calibrator {
    pub fn new(locator: ReferenceLocator) -> Self {
        Self { locator }
    }

    /// Calibrate against `image`.
    ///
    /// Parameters are validated before the locator runs, so a bad request
    /// never costs a detection.
    pub fn calibrate(
        &self,
        image: Arc<ImageFrame>,
        known_distance_cm: f64,
        known_object_width_cm: f64,
    ) -> Result<CalibrationProfile, EstimationError> {
        let known_distance_cm = require_positive("known distance", known_distance_cm)?;
        let known_object_width_cm =
            require_positive("known object width", known_object_width_cm)?;

        let detection = self.locator.locate(image)?;
        let apparent_width_px = detection.bbox.width;
        let focal_length_px =
            focal_length_px(apparent_width_px, known_distance_cm, known_object_width_cm)?;

        Ok(CalibrationProfile {
            known_object_width_cm,
            known_distance_cm,
            focal_length_px,
            apparent_width_px,
            calibrated_at_epoch_s: now_epoch_s(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, FixedLocator, SelectionPolicy, SharedLocator};
    use std::time::Duration;

    fn calibrator(detections: Vec<Detection>) -> (Calibrator, Arc<FixedLocator>) {
        let fixed = Arc::new(FixedLocator::new(detections));
        let shared: SharedLocator = fixed.clone();
        let locator =
            ReferenceLocator::new(shared, SelectionPolicy::default(), Duration::from_secs(2));
        (Calibrator::new(locator), fixed)
    }

    fn image() -> Arc<ImageFrame> {
        Arc::new(ImageFrame::from_rgb(vec![0u8; 12], 2, 2).unwrap())
    }

    fn box_of_width(width: f64, confidence: f64) -> Detection {
        Detection::new(BoundingBox::new(100.0, 80.0, width, 60.0), confidence)
    }

    #[test]
    fn computes_pinhole_focal_length() {
        let (cal, _) = calibrator(vec![box_of_width(200.0, 0.9)]);
        let profile = cal.calibrate(image(), 30.0, 8.5).unwrap();
        assert!((profile.focal_length_px - 705.882_352_94).abs() < 1e-6);
        assert_eq!(profile.apparent_width_px, 200.0);
        assert_eq!(profile.known_distance_cm, 30.0);
        assert_eq!(profile.known_object_width_cm, 8.5);
    }

    #[test]
    fn identical_inputs_give_identical_focal_length() {
        let (cal, _) = calibrator(vec![box_of_width(173.25, 0.8)]);
        let a = cal.calibrate(image(), 42.0, 6.1).unwrap();
        let b = cal.calibrate(image(), 42.0, 6.1).unwrap();
        assert_eq!(a.focal_length_px, b.focal_length_px);
        assert_eq!(a.focal_length_px, 173.25 * 42.0 / 6.1);
    }

    #[test]
    fn invalid_parameters_fail_before_detection() {
        let (cal, fixed) = calibrator(vec![box_of_width(200.0, 0.9)]);
        assert!(matches!(
            cal.calibrate(image(), 0.0, 8.5),
            Err(EstimationError::InvalidInput(_))
        ));
        assert!(matches!(
            cal.calibrate(image(), 30.0, -2.0),
            Err(EstimationError::InvalidInput(_))
        ));
        assert_eq!(fixed.calls(), 0);
    }

    #[test]
    fn low_confidence_or_missing_object_is_not_found() {
        let (cal, _) = calibrator(vec![box_of_width(200.0, 0.1)]);
        assert_eq!(
            cal.calibrate(image(), 30.0, 8.5),
            Err(EstimationError::NoObjectDetected)
        );
        let (cal, _) = calibrator(vec![]);
        assert_eq!(
            cal.calibrate(image(), 30.0, 8.5),
            Err(EstimationError::NoObjectDetected)
        );
    }

    #[test]
    fn zero_width_box_never_yields_a_focal_length() {
        let (cal, _) = calibrator(vec![box_of_width(0.0, 0.95)]);
        assert_eq!(
            cal.calibrate(image(), 30.0, 8.5),
            Err(EstimationError::NoObjectDetected)
        );
    }

    #[test]
    fn two_candidates_are_ambiguous() {
        let (cal, _) = calibrator(vec![box_of_width(200.0, 0.9), box_of_width(90.0, 0.7)]);
        assert_eq!(
            cal.calibrate(image(), 30.0, 8.5),
            Err(EstimationError::AmbiguousDetection { candidates: 2 })
        );
    }
}
