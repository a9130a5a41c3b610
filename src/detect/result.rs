use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A box is usable for ranging when it is finite with positive width.
    /// Height never enters the range computation, so a flat box is accepted.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height >= 0.0
    }
}

/// One object reported by a locator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Detector score in `[0, 1]`.
    pub confidence: f64,
    /// Object class, when the locator classifies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            bbox,
            confidence,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.bbox.is_valid() && (0.0..=1.0).contains(&self.confidence)
    }
}
