use std::sync::Arc;
use std::time::Duration;

use crate::detect::{detect_with_timeout, Detection, SelectionPolicy, SharedLocator};
use crate::error::EstimationError;
use crate::frame::ImageFrame;

/// Locator call plus single-detection policy, shared by calibration and
/// measurement so both apply the same rules.
#[derive(Clone)]
pub struct ReferenceLocator {
    locator: SharedLocator,
    policy: SelectionPolicy,
    timeout: Duration,
}

impl ReferenceLocator {
    pub fn new(locator: SharedLocator, policy: SelectionPolicy, timeout: Duration) -> Self {
        Self {
            locator,
            policy,
            timeout,
        }
    }

    /// Find the one reference object in `image`.
    pub fn locate(&self, image: Arc<ImageFrame>) -> Result<Detection, EstimationError> {
        let detections = detect_with_timeout(self.locator.clone(), image, self.timeout)?;
        log::debug!("locator returned {} detection(s)", detections.len());
        self.policy.select(detections)
    }
}
