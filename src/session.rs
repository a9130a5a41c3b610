use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::profile::CalibrationProfile;

pub const DEFAULT_SESSION: &str = "default";
const MAX_SESSION_ID_LEN: usize = 64;

/// Key of one calibration cell. 1-64 characters of `[A-Za-z0-9_-]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > MAX_SESSION_ID_LEN {
            return Err(anyhow!(
                "session id must be 1-{} characters",
                MAX_SESSION_ID_LEN
            ));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(anyhow!("session id may only contain [A-Za-z0-9_-]"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self(DEFAULT_SESSION.to_string())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-session state machine: `Uncalibrated -> Calibrated -> ... -> reset`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", content = "profile", rename_all = "snake_case")]
pub enum SessionState {
    Uncalibrated,
    Calibrated(CalibrationProfile),
}

impl SessionState {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, Self::Calibrated(_))
    }

    pub fn profile(&self) -> Option<&CalibrationProfile> {
        match self {
            Self::Calibrated(profile) => Some(profile),
            Self::Uncalibrated => None,
        }
    }
}
