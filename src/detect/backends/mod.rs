pub mod fixed;
pub mod marker;

#[cfg(feature = "locator-remote")]
pub mod remote;

pub use fixed::FixedLocator;
pub use marker::{MarkerConfig, MarkerLocator};

#[cfg(feature = "locator-remote")]
pub use remote::{RemoteLocator, RemoteLocatorConfig};
