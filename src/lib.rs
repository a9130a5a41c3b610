//! Rangefinder: monocular distance estimation with a pinhole camera model.
//!
//! A camera is calibrated once by photographing a reference object of known
//! width at a known distance, which fixes its focal length in pixels:
//!
//! ```text
//! focal_length_px = apparent_width_px * known_distance_cm / known_object_width_cm
//! ```
//!
//! Later images of the same object yield its distance:
//!
//! ```text
//! distance_cm = focal_length_px * known_object_width_cm / apparent_width_px
//! ```
//!
//! # Module Structure
//!
//! - `detect`: object locators behind one trait, the single-detection policy,
//!   and bounded (timed-out) locator calls
//! - `calibrate` / `estimate`: the two pinhole computations
//! - `service`: per-session calibration cells over a `ProfileStore`
//! - `api`: the HTTP contract (`/api/calibrate`, `/api/measure`, ...)
//! - `config`: file and environment configuration for the binaries

pub mod api;
pub mod calibrate;
pub mod config;
pub mod detect;
pub mod error;
pub mod estimate;
pub mod frame;
pub mod geometry;
pub mod locate;
pub mod profile;
pub mod service;
pub mod session;
pub mod storage;

pub use calibrate::Calibrator;
pub use config::{LocatorSettings, RangefinderConfig};
pub use detect::{BoundingBox, Detection, LocatorRegistry, ObjectLocator, SelectionPolicy};
pub use error::EstimationError;
pub use estimate::{Estimator, MeasurementResult};
pub use frame::ImageFrame;
pub use locate::ReferenceLocator;
pub use profile::{CalibrationProfile, FocalCalibration};
pub use service::{DistanceService, MeasurementRequest, ReferenceDefaults};
pub use session::{SessionId, SessionState};
pub use storage::{InMemoryProfileStore, ProfileStore, SqliteProfileStore};
