use anyhow::Result;

use crate::frame::ImageFrame;

use super::result::Detection;

/// Object locator trait.
///
/// Reduces an image to the bounding boxes of candidate objects. The numeric
/// core only ever sees the returned boxes, so implementations can be an
/// in-process model, a remote service or a fixed fake.
///
/// Errors returned from `detect` are treated as transport failures by the
/// caller. An empty vector means "nothing found" and is not an error.
///
/// `detect` takes `&self`: one locator instance serves every session at once,
/// so implementations keep any per-call state local or behind their own sync.
pub trait ObjectLocator: Send + Sync {
    /// Locator identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a decoded image.
    fn detect(&self, image: &ImageFrame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
