use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::detect::locator::ObjectLocator;
use crate::detect::result::Detection;
use crate::frame::ImageFrame;

/// Fixed locator for testing and demos. Reports the same detections for every image.
#[derive(Debug, Default)]
pub struct FixedLocator {
    detections: Vec<Detection>,
    calls: AtomicU64,
}

impl FixedLocator {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            calls: AtomicU64::new(0),
        }
    }

    /// Number of `detect` calls served.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ObjectLocator for FixedLocator {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&self, _image: &ImageFrame) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn fixed_locator_ignores_image_content() {
        let det = Detection::new(BoundingBox::new(1.0, 2.0, 30.0, 40.0), 0.75);
        let locator = FixedLocator::new(vec![det.clone()]);
        let a = ImageFrame::from_rgb(vec![0u8; 3], 1, 1).unwrap();
        let b = ImageFrame::from_rgb(vec![255u8; 3], 1, 1).unwrap();
        assert_eq!(locator.detect(&a).unwrap(), vec![det.clone()]);
        assert_eq!(locator.detect(&b).unwrap(), vec![det]);
        assert_eq!(locator.calls(), 2);
    }
}
