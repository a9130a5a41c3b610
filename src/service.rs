//! Session-keyed distance estimation service.
//!
//! Each session owns one calibration cell guarded by its own mutex. Calibrate,
//! measure, reset and state calls for the same session are serialized on that
//! mutex (last writer wins); calls for different sessions proceed in parallel.
//! Cells are loaded lazily from the `ProfileStore` and written through on
//! every successful calibration. Only calibrated sessions keep a cell; an
//! uncalibrated one leaves the table when its last caller finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::calibrate::Calibrator;
use crate::error::EstimationError;
use crate::estimate::{Estimator, MeasurementResult};
use crate::frame::ImageFrame;
use crate::geometry::require_positive;
use crate::locate::ReferenceLocator;
use crate::profile::{CalibrationProfile, FocalCalibration};
use crate::session::{SessionId, SessionState};
use crate::storage::ProfileStore;

pub const DEFAULT_OBJECT_WIDTH_CM: f64 = 8.5;
pub const DEFAULT_DISTANCE_CM: f64 = 30.0;

/// Reference object assumed when a request leaves it unspecified.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReferenceDefaults {
    pub object_width_cm: f64,
    pub distance_cm: f64,
}

impl Default for ReferenceDefaults {
    fn default() -> Self {
        Self {
            object_width_cm: DEFAULT_OBJECT_WIDTH_CM,
            distance_cm: DEFAULT_DISTANCE_CM,
        }
    }
}

/// A measurement as received from a client. `focal_length_px` is set when
/// the client holds its own calibration.
pub struct MeasurementRequest {
    pub image: Arc<ImageFrame>,
    pub focal_length_px: Option<f64>,
}

#[derive(Default)]
struct SessionCell {
    loaded: bool,
    profile: Option<CalibrationProfile>,
}

pub struct DistanceService {
    calibrator: Calibrator,
    estimator: Estimator,
    reference: ReferenceDefaults,
    store: Mutex<Box<dyn ProfileStore>>,
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<SessionCell>>>>,
}

impl DistanceService {
    pub fn new(
        locator: ReferenceLocator,
        reference: ReferenceDefaults,
        store: Box<dyn ProfileStore>,
    ) -> Self {
        Self {
            calibrator: Calibrator::new(locator.clone()),
            estimator: Estimator::new(locator),
            reference,
            store: Mutex::new(store),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<SessionId, Arc<Mutex<SessionCell>>>>, EstimationError> {
        self.sessions
            .lock()
            .map_err(|_| EstimationError::Internal("session table lock poisoned".into()))
    }

    fn cell(&self, session: &SessionId) -> Result<Arc<Mutex<SessionCell>>, EstimationError> {
        Ok(self.sessions()?.entry(session.clone()).or_default().clone())
    }

    fn store(&self) -> Result<MutexGuard<'_, Box<dyn ProfileStore>>, EstimationError> {
        self.store
            .lock()
            .map_err(|_| EstimationError::Internal("profile store lock poisoned".into()))
    }

    fn lock_loaded<'a>(
        &self,
        session: &SessionId,
        cell: &'a Mutex<SessionCell>,
    ) -> Result<MutexGuard<'a, SessionCell>, EstimationError> {
        let mut guard = cell
            .lock()
            .map_err(|_| EstimationError::Internal(format!("session '{session}' lock poisoned")))?;
        if !guard.loaded {
            guard.profile = self.store()?.load(session)?;
            guard.loaded = true;
        }
        Ok(guard)
    }

    /// Run `op` with the session cell locked, then release the cell.
    fn with_session<T>(
        &self,
        session: &SessionId,
        op: impl FnOnce(&mut SessionCell) -> Result<T, EstimationError>,
    ) -> Result<T, EstimationError> {
        let cell = self.cell(session)?;
        let result = self
            .lock_loaded(session, &cell)
            .and_then(|mut guard| op(&mut *guard));
        self.release(session, cell)?;
        result
    }

    /// Drop an uncalibrated cell from the table once no other caller holds
    /// it. Calibrated cells stay as the cached copy of the stored profile.
    fn release(
        &self,
        session: &SessionId,
        cell: Arc<Mutex<SessionCell>>,
    ) -> Result<(), EstimationError> {
        let mut sessions = self.sessions()?;
        // Clones are only handed out under the table lock, so the count is
        // stable while it is held.
        let tracked = sessions
            .get(session)
            .is_some_and(|entry| Arc::ptr_eq(entry, &cell));
        if tracked && Arc::strong_count(&cell) == 2 {
            let idle = cell.lock().map(|c| c.profile.is_none()).unwrap_or(true);
            if idle {
                sessions.remove(session);
            }
        }
        drop(cell);
        Ok(())
    }

    /// Calibrate `session`. Missing parameters fall back to the reference defaults.
    pub fn calibrate(
        &self,
        session: &SessionId,
        image: Arc<ImageFrame>,
        known_distance_cm: Option<f64>,
        known_object_width_cm: Option<f64>,
    ) -> Result<CalibrationProfile, EstimationError> {
        let distance = known_distance_cm.unwrap_or(self.reference.distance_cm);
        let width = known_object_width_cm.unwrap_or(self.reference.object_width_cm);

        let profile = self.with_session(session, |cell| {
            let profile = self.calibrator.calibrate(image, distance, width)?;
            self.store()?.save(session, &profile)?;
            cell.profile = Some(profile.clone());
            Ok(profile)
        })?;

        log::info!(
            "session {} calibrated: focal length {:.1}px ({:.1}px wide at {:.1}cm, object {:.1}cm)",
            session,
            profile.focal_length_px,
            profile.apparent_width_px,
            profile.known_distance_cm,
            profile.known_object_width_cm
        );
        Ok(profile)
    }

    /// Measure against the session profile, or against a client-held focal
    /// length when the request carries one.
    pub fn measure(
        &self,
        session: &SessionId,
        request: MeasurementRequest,
    ) -> Result<MeasurementResult, EstimationError> {
        let result = self.with_session(session, |cell| {
            let calibration = match request.focal_length_px {
                Some(focal) => {
                    let width = cell
                        .profile
                        .as_ref()
                        .map(|p| p.known_object_width_cm)
                        .unwrap_or(self.reference.object_width_cm);
                    Some(FocalCalibration::client_held(focal, width)?)
                }
                None => cell.profile.as_ref().map(CalibrationProfile::focal),
            };
            self.estimator.measure(request.image, calibration)
        })?;

        log::info!(
            "session {} measured {:.1}cm ({:.1}px wide, confidence {:.2})",
            session,
            result.distance_cm,
            result.apparent_width_px,
            result.confidence
        );
        Ok(result)
    }

    /// Drop the session profile. Returns true when the session was calibrated.
    pub fn reset(&self, session: &SessionId) -> Result<bool, EstimationError> {
        let was_calibrated = self.with_session(session, |cell| {
            let removed = self.store()?.remove(session)?;
            Ok(cell.profile.take().is_some() || removed)
        })?;

        if was_calibrated {
            log::info!("session {} reset", session);
        }
        Ok(was_calibrated)
    }

    pub fn state(&self, session: &SessionId) -> Result<SessionState, EstimationError> {
        self.with_session(session, |cell| {
            Ok(match &cell.profile {
                Some(profile) => SessionState::Calibrated(profile.clone()),
                None => SessionState::Uncalibrated,
            })
        })
    }
}

/// Validate optional numeric form input.
pub fn optional_positive(name: &str, value: Option<f64>) -> Result<Option<f64>, EstimationError> {
    value.map(|v| require_positive(name, v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, FixedLocator, SelectionPolicy, SharedLocator};
    use crate::storage::InMemoryProfileStore;
    use std::time::Duration;

    fn service(width: f64) -> DistanceService {
        let det = Detection::new(BoundingBox::new(5.0, 5.0, width, 40.0), 0.9);
        let shared: SharedLocator = Arc::new(FixedLocator::new(vec![det]));
        DistanceService::new(
            ReferenceLocator::new(shared, SelectionPolicy::default(), Duration::from_secs(2)),
            ReferenceDefaults::default(),
            Box::new(InMemoryProfileStore::new()),
        )
    }

    fn image() -> Arc<ImageFrame> {
        Arc::new(ImageFrame::from_rgb(vec![0u8; 12], 2, 2).unwrap())
    }

    fn session(name: &str) -> SessionId {
        SessionId::parse(name).unwrap()
    }

    #[test]
    fn calibrate_uses_reference_defaults() {
        let svc = service(200.0);
        let profile = svc.calibrate(&session("a"), image(), None, None).unwrap();
        assert_eq!(profile.known_distance_cm, DEFAULT_DISTANCE_CM);
        assert_eq!(profile.known_object_width_cm, DEFAULT_OBJECT_WIDTH_CM);
        assert!((profile.focal_length_px - 705.882_352_94).abs() < 1e-6);
    }

    #[test]
    fn state_machine_transitions() {
        let svc = service(200.0);
        let s = session("cam");
        assert_eq!(svc.state(&s).unwrap(), SessionState::Uncalibrated);

        let first = svc.calibrate(&s, image(), Some(30.0), Some(8.5)).unwrap();
        assert_eq!(svc.state(&s).unwrap(), SessionState::Calibrated(first));

        let second = svc.calibrate(&s, image(), Some(60.0), Some(8.5)).unwrap();
        assert_eq!(
            svc.state(&s).unwrap(),
            SessionState::Calibrated(second.clone())
        );
        assert!((second.focal_length_px - 200.0 * 60.0 / 8.5).abs() < 1e-9);

        assert!(svc.reset(&s).unwrap());
        assert_eq!(svc.state(&s).unwrap(), SessionState::Uncalibrated);
        assert!(!svc.reset(&s).unwrap());
    }

    #[test]
    fn measure_requires_calibration() {
        let svc = service(100.0);
        let err = svc
            .measure(
                &session("fresh"),
                MeasurementRequest {
                    image: image(),
                    focal_length_px: None,
                },
            )
            .unwrap_err();
        assert_eq!(err, EstimationError::NotCalibrated);
    }

    #[test]
    fn sessions_are_independent() {
        let svc = service(200.0);
        svc.calibrate(&session("one"), image(), None, None).unwrap();
        assert!(svc.state(&session("one")).unwrap().is_calibrated());
        assert!(!svc.state(&session("two")).unwrap().is_calibrated());
    }

    #[test]
    fn client_held_focal_length_uses_default_width() {
        let svc = service(100.0);
        let focal = 200.0 * 30.0 / 8.5;
        let result = svc
            .measure(
                &session("stateless"),
                MeasurementRequest {
                    image: image(),
                    focal_length_px: Some(focal),
                },
            )
            .unwrap();
        assert!((result.distance_cm - 60.0).abs() < 1e-9);
    }

    #[test]
    fn measure_reuses_stored_reference_width() {
        let svc = service(150.0);
        let s = session("custom");
        let profile = svc.calibrate(&s, image(), Some(40.0), Some(12.0)).unwrap();
        let result = svc
            .measure(
                &s,
                MeasurementRequest {
                    image: image(),
                    focal_length_px: None,
                },
            )
            .unwrap();
        assert!((result.distance_cm - 40.0).abs() < 1e-9);
        assert_eq!(profile.known_object_width_cm, 12.0);
    }

    fn tracked(svc: &DistanceService) -> usize {
        svc.sessions.lock().unwrap().len()
    }

    #[test]
    fn session_table_keeps_only_calibrated_sessions() {
        let svc = service(200.0);
        for i in 0..500 {
            assert!(!svc.state(&session(&format!("visitor-{i}"))).unwrap().is_calibrated());
        }
        assert_eq!(tracked(&svc), 0);

        let _ = svc
            .measure(
                &session("never"),
                MeasurementRequest {
                    image: image(),
                    focal_length_px: None,
                },
            )
            .unwrap_err();
        let _ = svc
            .calibrate(&session("rejected"), image(), Some(-1.0), None)
            .unwrap_err();
        assert_eq!(tracked(&svc), 0);

        let s = session("kept");
        svc.calibrate(&s, image(), None, None).unwrap();
        assert_eq!(tracked(&svc), 1);

        assert!(svc.reset(&s).unwrap());
        assert_eq!(tracked(&svc), 0);
        assert_eq!(svc.state(&s).unwrap(), SessionState::Uncalibrated);
    }

    #[test]
    fn optional_positive_validates_present_values() {
        assert_eq!(optional_positive("x", None).unwrap(), None);
        assert_eq!(optional_positive("x", Some(2.0)).unwrap(), Some(2.0));
        assert!(optional_positive("x", Some(0.0)).is_err());
    }
}
