use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::detect::locator::ObjectLocator;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::ImageFrame;

/// Settings for the colour-marker locator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Marker colour as RGB.
    pub color: [u8; 3],
    /// Maximum per-channel distance from `color` for a pixel to count.
    pub tolerance: u8,
    /// Regions smaller than this many pixels are ignored.
    pub min_area_px: usize,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            color: [0, 200, 0],
            tolerance: 60,
            min_area_px: 64,
        }
    }
}

/// In-process locator for a solid-coloured reference object.
///
/// Pixels close to the marker colour are grouped into 4-connected regions;
/// every region of sufficient area becomes a detection whose confidence is the
/// fraction of its bounding box actually covered by marker pixels. A flat
/// rectangular marker therefore scores close to 1.
pub struct MarkerLocator {
    cfg: MarkerConfig,
}

impl MarkerLocator {
    pub fn new(cfg: MarkerConfig) -> Result<Self> {
        if cfg.min_area_px == 0 {
            return Err(anyhow!("marker min_area_px must be greater than zero"));
        }
        Ok(Self { cfg })
    }

    fn matches(&self, px: [u8; 3]) -> bool {
        px.iter()
            .zip(self.cfg.color.iter())
            .all(|(a, b)| a.abs_diff(*b) <= self.cfg.tolerance)
    }
}

struct Region {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: usize,
}

impl ObjectLocator for MarkerLocator {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn detect(&self, image: &ImageFrame) -> Result<Vec<Detection>> {
        let w = image.width as usize;
        let h = image.height as usize;
        let mask: Vec<bool> = image
            .pixels()
            .chunks_exact(3)
            .map(|px| self.matches([px[0], px[1], px[2]]))
            .collect();
        let mut visited = vec![false; w * h];
        let mut queue = VecDeque::new();
        let mut detections = Vec::new();

        for start in 0..w * h {
            if !mask[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            queue.push_back(start);
            let mut region = Region {
                min_x: (start % w) as u32,
                min_y: (start / w) as u32,
                max_x: (start % w) as u32,
                max_y: (start / w) as u32,
                area: 0,
            };
            while let Some(idx) = queue.pop_front() {
                let x = idx % w;
                let y = idx / w;
                region.area += 1;
                region.min_x = region.min_x.min(x as u32);
                region.max_x = region.max_x.max(x as u32);
                region.min_y = region.min_y.min(y as u32);
                region.max_y = region.max_y.max(y as u32);

                let mut visit = |n: usize| {
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        queue.push_back(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < w {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - w);
                }
                if y + 1 < h {
                    visit(idx + w);
                }
            }

            if region.area < self.cfg.min_area_px {
                continue;
            }
            let bw = (region.max_x - region.min_x + 1) as f64;
            let bh = (region.max_y - region.min_y + 1) as f64;
            let fill = (region.area as f64 / (bw * bh)).clamp(0.0, 1.0);
            detections.push(
                Detection::new(
                    BoundingBox::new(region.min_x as f64, region.min_y as f64, bw, bh),
                    fill,
                )
                .with_label("marker"),
            );
        }

        log::debug!(
            "marker locator found {} region(s) in {}x{} image",
            detections.len(),
            image.width,
            image.height
        );
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREEN: [u8; 3] = [0, 200, 0];

    fn canvas(width: u32, height: u32) -> Vec<u8> {
        vec![30u8; (width * height * 3) as usize]
    }

    fn paint(pixels: &mut [u8], width: u32, x0: u32, y0: u32, w: u32, h: u32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                let idx = ((y * width + x) * 3) as usize;
                pixels[idx..idx + 3].copy_from_slice(&GREEN);
            }
        }
    }

    fn locator() -> MarkerLocator {
        MarkerLocator::new(MarkerConfig {
            color: GREEN,
            tolerance: 20,
            min_area_px: 10,
        })
        .unwrap()
    }

    #[test]
    fn finds_single_rectangle() {
        let mut px = canvas(64, 48);
        paint(&mut px, 64, 10, 5, 20, 8);
        let image = ImageFrame::from_rgb(px, 64, 48).unwrap();
        let found = locator().detect(&image).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox, BoundingBox::new(10.0, 5.0, 20.0, 8.0));
        assert!((found[0].confidence - 1.0).abs() < 1e-12);
        assert_eq!(found[0].label.as_deref(), Some("marker"));
    }

    #[test]
    fn separate_regions_are_separate_detections() {
        let mut px = canvas(64, 48);
        paint(&mut px, 64, 2, 2, 10, 10);
        paint(&mut px, 64, 40, 20, 12, 6);
        paint(&mut px, 64, 30, 40, 2, 2); // below min area
        let image = ImageFrame::from_rgb(px, 64, 48).unwrap();
        let found = locator().detect(&image).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn empty_image_has_no_detections() {
        let image = ImageFrame::from_rgb(canvas(16, 16), 16, 16).unwrap();
        assert!(locator().detect(&image).unwrap().is_empty());
    }

    #[test]
    fn rejects_zero_min_area() {
        assert!(MarkerLocator::new(MarkerConfig {
            min_area_px: 0,
            ..MarkerConfig::default()
        })
        .is_err());
    }
}
