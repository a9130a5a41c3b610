use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::EstimationError;
use crate::geometry::require_positive;

/// Result of a successful calibration. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// True width of the reference object. Measurements reuse it.
    pub known_object_width_cm: f64,
    pub known_distance_cm: f64,
    pub focal_length_px: f64,
    /// Apparent width of the reference object in the calibration image.
    pub apparent_width_px: f64,
    pub calibrated_at_epoch_s: u64,
}

impl CalibrationProfile {
    pub fn focal(&self) -> FocalCalibration {
        FocalCalibration {
            focal_length_px: self.focal_length_px,
            known_object_width_cm: self.known_object_width_cm,
        }
    }
}

/// The two numbers a measurement needs: focal length and the reference
/// width it was established with. They always travel together.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FocalCalibration {
    pub focal_length_px: f64,
    pub known_object_width_cm: f64,
}

impl FocalCalibration {
    /// Calibration held by a client and sent back with a measurement.
    pub fn client_held(
        focal_length_px: f64,
        known_object_width_cm: f64,
    ) -> Result<Self, EstimationError> {
        if !(focal_length_px.is_finite() && focal_length_px > 0.0) {
            return Err(EstimationError::NotCalibrated);
        }
        Ok(Self {
            focal_length_px,
            known_object_width_cm: require_positive("known object width", known_object_width_cm)?,
        })
    }
}

pub(crate) fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
