mod backends;
mod bounded;
mod locator;
mod registry;
mod result;
mod select;

pub use backends::{FixedLocator, MarkerConfig, MarkerLocator};
#[cfg(feature = "locator-remote")]
pub use backends::{RemoteLocator, RemoteLocatorConfig};
pub use bounded::{detect_with_timeout, DEFAULT_DETECT_TIMEOUT};
pub use locator::ObjectLocator;
pub use registry::{LocatorRegistry, SharedLocator};
pub use result::{BoundingBox, Detection};
pub use select::{SelectionPolicy, DEFAULT_MIN_CONFIDENCE};
