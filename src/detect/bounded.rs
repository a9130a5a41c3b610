use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::error::EstimationError;
use crate::frame::ImageFrame;

use super::registry::SharedLocator;
use super::result::Detection;

pub const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a locator on a worker thread and give up after `timeout`.
///
/// Locators are shared without a lock, so the budget covers only this call's
/// own detection. On timeout the worker is detached and its result dropped.
pub fn detect_with_timeout(
    locator: SharedLocator,
    image: Arc<ImageFrame>,
    timeout: Duration,
) -> Result<Vec<Detection>, EstimationError> {
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name("object-locator".to_string())
        .spawn(move || {
            let result = locator
                .detect(&image)
                .map_err(|err| EstimationError::Transport(format!("{err:#}")));
            let _ = tx.send(result);
        })
        .map_err(|err| EstimationError::Internal(format!("spawn locator worker: {err}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(EstimationError::DetectionTimeout { timeout }),
        Err(RecvTimeoutError::Disconnected) => Err(EstimationError::Internal(
            "object locator worker exited without a result".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, FixedLocator, ObjectLocator};
    use anyhow::{anyhow, Result};
    use std::time::Instant;

    struct SlowLocator(Duration);

    impl ObjectLocator for SlowLocator {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn detect(&self, _image: &ImageFrame) -> Result<Vec<Detection>> {
            std::thread::sleep(self.0);
            Ok(vec![])
        }
    }

    struct FailingLocator;

    impl ObjectLocator for FailingLocator {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&self, _image: &ImageFrame) -> Result<Vec<Detection>> {
            Err(anyhow!("connection refused"))
        }
    }

    fn image() -> Arc<ImageFrame> {
        Arc::new(ImageFrame::from_rgb(vec![0u8; 12], 2, 2).unwrap())
    }

    #[test]
    fn returns_locator_output() {
        let det = Detection::new(BoundingBox::new(0.0, 0.0, 5.0, 5.0), 0.9);
        let locator: SharedLocator = Arc::new(FixedLocator::new(vec![det.clone()]));
        let out = detect_with_timeout(locator, image(), Duration::from_secs(2)).unwrap();
        assert_eq!(out, vec![det]);
    }

    #[test]
    fn slow_locator_times_out() {
        let locator: SharedLocator = Arc::new(SlowLocator(Duration::from_millis(500)));
        let err = detect_with_timeout(locator, image(), Duration::from_millis(20)).unwrap_err();
        assert_eq!(
            err,
            EstimationError::DetectionTimeout {
                timeout: Duration::from_millis(20)
            }
        );
    }

    #[test]
    fn locator_errors_are_transport_errors() {
        let locator: SharedLocator = Arc::new(FailingLocator);
        let err = detect_with_timeout(locator, image(), Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, EstimationError::Transport(msg) if msg.contains("refused")));
    }

    #[test]
    fn concurrent_calls_on_one_locator_do_not_queue() {
        let locator: SharedLocator = Arc::new(SlowLocator(Duration::from_millis(300)));
        let started = Instant::now();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let locator = locator.clone();
                std::thread::spawn(move || {
                    detect_with_timeout(locator, image(), Duration::from_millis(500))
                })
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap().is_ok());
        }
        assert!(started.elapsed() < Duration::from_millis(900));
    }
}
