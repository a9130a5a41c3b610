use serde::Serialize;
use std::sync::Arc;

use crate::error::EstimationError;
use crate::frame::ImageFrame;
use crate::geometry::distance_cm;
use crate::locate::ReferenceLocator;
use crate::profile::FocalCalibration;

/// Distance to the reference object in one image.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeasurementResult {
    pub distance_cm: f64,
    pub apparent_width_px: f64,
    pub confidence: f64,
}

/// Derives distance from apparent size and a stored focal length.
#[derive(Clone)]
pub struct Estimator {
    locator: ReferenceLocator,
}

impl Estimator {
    pub fn new(locator: ReferenceLocator) -> Self {
        Self { locator }
    }

    /// Measure the distance to the reference object in `image`.
    ///
    /// Fails with `NotCalibrated` before running the locator when no usable
    /// focal length is available.
    pub fn measure(
        &self,
        image: Arc<ImageFrame>,
        calibration: Option<FocalCalibration>,
    ) -> Result<MeasurementResult, EstimationError> {
        let calibration = calibration.ok_or(EstimationError::NotCalibrated)?;
        if !(calibration.focal_length_px.is_finite() && calibration.focal_length_px > 0.0) {
            return Err(EstimationError::NotCalibrated);
        }

        let detection = self.locator.locate(image)?;
        let distance_cm = distance_cm(
            calibration.focal_length_px,
            calibration.known_object_width_cm,
            detection.bbox.width,
        )?;
        Ok(MeasurementResult {
            distance_cm,
            apparent_width_px: detection.bbox.width,
            confidence: detection.confidence,
        })
    }
}
