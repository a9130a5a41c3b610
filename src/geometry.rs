//! Pinhole camera relations.
//!
//! Apparent size is proportional to focal length and true size, and inversely
//! proportional to distance:
//!
//! ```text
//! apparent_width_px = focal_length_px * true_width_cm / distance_cm
//! ```
//!
//! Calibration solves this for the focal length, measurement for the distance.

use crate::error::EstimationError;

/// Returns `value` when it is finite and strictly positive.
pub fn require_positive(name: &str, value: f64) -> Result<f64, EstimationError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(EstimationError::invalid(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}

/// Focal length in pixels from a reference object seen at a known distance.
pub fn focal_length_px(
    apparent_width_px: f64,
    known_distance_cm: f64,
    known_object_width_cm: f64,
) -> Result<f64, EstimationError> {
    let w = require_positive("apparent width", apparent_width_px)?;
    let d = require_positive("known distance", known_distance_cm)?;
    let width = require_positive("known object width", known_object_width_cm)?;
    Ok(w * d / width)
}

/// Distance in centimetres to an object of known width.
pub fn distance_cm(
    focal_length_px: f64,
    known_object_width_cm: f64,
    apparent_width_px: f64,
) -> Result<f64, EstimationError> {
    let f = require_positive("focal length", focal_length_px)?;
    let width = require_positive("known object width", known_object_width_cm)?;
    let w = require_positive("apparent width", apparent_width_px)?;
    Ok(f * width / w)
}
