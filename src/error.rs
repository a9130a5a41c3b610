use std::time::Duration;

/// Failures of a calibrate or measure call.
///
/// A failed call never changes the session profile. Apart from `Transport`
/// and `Internal`, the client can recover by retrying with a better image or
/// by calibrating first.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no reference object detected")]
    NoObjectDetected,
    #[error("ambiguous detection ({candidates} candidates above threshold)")]
    AmbiguousDetection { candidates: usize },
    #[error("not calibrated")]
    NotCalibrated,
    #[error("object locator did not answer within {timeout:?}")]
    DetectionTimeout { timeout: Duration },
    #[error("object locator transport error: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EstimationError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable snake_case code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NoObjectDetected => "no_object_detected",
            Self::AmbiguousDetection { .. } => "ambiguous_detection",
            Self::NotCalibrated => "not_calibrated",
            Self::DetectionTimeout { .. } => "detection_timeout",
            Self::Transport(_) => "transport_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// True for failures the client can fix by itself; these are reported
    /// with HTTP 200 and `success: false`.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Transport(_) | Self::Internal(_))
    }
}

impl From<anyhow::Error> for EstimationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EstimationError::NotCalibrated.code(), "not_calibrated");
        assert_eq!(
            EstimationError::AmbiguousDetection { candidates: 2 }.code(),
            "ambiguous_detection"
        );
        assert_eq!(
            EstimationError::Transport("refused".into()).code(),
            "transport_error"
        );
    }

    #[test]
    fn only_server_side_failures_are_unrecoverable() {
        assert!(EstimationError::NoObjectDetected.is_recoverable());
        assert!(EstimationError::DetectionTimeout {
            timeout: Duration::from_millis(10)
        }
        .is_recoverable());
        assert!(!EstimationError::Transport("x".into()).is_recoverable());
        assert!(!EstimationError::Internal("x".into()).is_recoverable());
    }
}
