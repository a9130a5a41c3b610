use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::api::{ApiConfig, DEFAULT_API_ADDR, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_CONNECTIONS};
use crate::detect::{
    Detection, FixedLocator, LocatorRegistry, MarkerConfig, MarkerLocator, SelectionPolicy,
    DEFAULT_DETECT_TIMEOUT, DEFAULT_MIN_CONFIDENCE,
};
use crate::locate::ReferenceLocator;
use crate::service::{
    DistanceService, ReferenceDefaults, DEFAULT_DISTANCE_CM, DEFAULT_OBJECT_WIDTH_CM,
};
use crate::storage::{InMemoryProfileStore, ProfileStore, SqliteProfileStore};

const DEFAULT_LOCATOR: &str = "marker";
const KNOWN_LOCATORS: &[&str] = &["marker", "fixed", "remote"];

#[derive(Debug, Deserialize, Default)]
struct RangefinderConfigFile {
    api: Option<ApiConfigFile>,
    locator: Option<LocatorConfigFile>,
    reference: Option<ReferenceConfigFile>,
    store: Option<StoreConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
    max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct LocatorConfigFile {
    backend: Option<String>,
    timeout_ms: Option<u64>,
    min_confidence: Option<f64>,
    expected_label: Option<String>,
    remote_url: Option<String>,
    marker: Option<MarkerConfig>,
    fixed: Option<Vec<Detection>>,
}

#[derive(Debug, Deserialize, Default)]
struct ReferenceConfigFile {
    object_width_cm: Option<f64>,
    default_distance_cm: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct StoreConfigFile {
    db_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RangefinderConfig {
    pub api: ApiConfig,
    pub locator: LocatorSettings,
    pub reference: ReferenceDefaults,
    /// SQLite profile database; profiles live in memory when unset.
    pub db_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LocatorSettings {
    pub backend: String,
    pub timeout: Duration,
    pub min_confidence: f64,
    pub expected_label: Option<String>,
    pub remote_url: Option<String>,
    pub marker: MarkerConfig,
    pub fixed: Vec<Detection>,
}

impl RangefinderConfig {
    /// Load from `RANGEFINDER_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RANGEFINDER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RangefinderConfigFile) -> Self {
        let api_file = file.api.unwrap_or_default();
        let api = ApiConfig {
            addr: api_file
                .addr
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_body_bytes: api_file.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            max_connections: api_file.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        };
        let locator_file = file.locator.unwrap_or_default();
        let locator = LocatorSettings {
            backend: locator_file
                .backend
                .unwrap_or_else(|| DEFAULT_LOCATOR.to_string()),
            timeout: locator_file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DETECT_TIMEOUT),
            min_confidence: locator_file
                .min_confidence
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            expected_label: locator_file.expected_label,
            remote_url: locator_file.remote_url,
            marker: locator_file.marker.unwrap_or_default(),
            fixed: locator_file.fixed.unwrap_or_default(),
        };
        let reference_file = file.reference.unwrap_or_default();
        let reference = ReferenceDefaults {
            object_width_cm: reference_file
                .object_width_cm
                .unwrap_or(DEFAULT_OBJECT_WIDTH_CM),
            distance_cm: reference_file
                .default_distance_cm
                .unwrap_or(DEFAULT_DISTANCE_CM),
        };
        Self {
            api,
            locator,
            reference,
            db_path: file.store.and_then(|store| store.db_path),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = non_empty_env("RANGEFINDER_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(path) = non_empty_env("RANGEFINDER_DB_PATH") {
            self.db_path = Some(path);
        }
        if let Some(backend) = non_empty_env("RANGEFINDER_LOCATOR") {
            self.locator.backend = backend;
        }
        if let Some(url) = non_empty_env("RANGEFINDER_LOCATOR_URL") {
            self.locator.remote_url = Some(url);
        }
        if let Some(timeout) = non_empty_env("RANGEFINDER_DETECT_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("RANGEFINDER_DETECT_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.locator.timeout = Duration::from_millis(millis);
        }
        if let Some(confidence) = non_empty_env("RANGEFINDER_MIN_CONFIDENCE") {
            self.locator.min_confidence = confidence
                .parse()
                .map_err(|_| anyhow!("RANGEFINDER_MIN_CONFIDENCE must be a number"))?;
        }
        if let Some(width) = non_empty_env("RANGEFINDER_OBJECT_WIDTH_CM") {
            self.reference.object_width_cm = width
                .parse()
                .map_err(|_| anyhow!("RANGEFINDER_OBJECT_WIDTH_CM must be a number"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.locator.backend = self.locator.backend.trim().to_lowercase();
        if !KNOWN_LOCATORS.contains(&self.locator.backend.as_str()) {
            return Err(anyhow!(
                "unknown locator backend '{}'; expected one of {}",
                self.locator.backend,
                KNOWN_LOCATORS.join(", ")
            ));
        }
        if self.locator.backend == "remote" && self.locator.remote_url.is_none() {
            return Err(anyhow!("remote locator requires locator.remote_url"));
        }
        if self.locator.timeout.is_zero() {
            return Err(anyhow!("locator timeout must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.locator.min_confidence) {
            return Err(anyhow!("locator min_confidence must be within [0, 1]"));
        }
        if !(self.reference.object_width_cm.is_finite() && self.reference.object_width_cm > 0.0)
        {
            return Err(anyhow!("reference object width must be a positive number"));
        }
        if !(self.reference.distance_cm.is_finite() && self.reference.distance_cm > 0.0) {
            return Err(anyhow!("reference distance must be a positive number"));
        }
        if self.api.max_body_bytes == 0 || self.api.max_connections == 0 {
            return Err(anyhow!("api limits must be greater than zero"));
        }
        Ok(())
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            min_confidence: self.locator.min_confidence,
            expected_label: self.locator.expected_label.clone(),
        }
    }

    /// Register every locator this configuration can build and make the
    /// configured backend the default.
    pub fn build_registry(&self) -> Result<LocatorRegistry> {
        let mut registry = LocatorRegistry::new();
        registry.register(MarkerLocator::new(self.locator.marker.clone())?);
        registry.register(FixedLocator::new(self.locator.fixed.clone()));
        if let Some(url) = &self.locator.remote_url {
            register_remote(&mut registry, url, self.locator.timeout)?;
        }
        registry.set_default(&self.locator.backend)?;
        Ok(registry)
    }

    pub fn open_store(&self) -> Result<Box<dyn ProfileStore>> {
        Ok(match &self.db_path {
            Some(path) => Box::new(
                SqliteProfileStore::open(path)
                    .with_context(|| format!("open profile database {}", path))?,
            ),
            None => Box::new(InMemoryProfileStore::new()),
        })
    }

    /// Build the service around the named locator (default when `None`).
    pub fn build_service(
        &self,
        registry: &LocatorRegistry,
        locator: Option<&str>,
    ) -> Result<Arc<DistanceService>> {
        let locator = ReferenceLocator::new(
            registry.resolve(locator)?,
            self.selection_policy(),
            self.locator.timeout,
        );
        Ok(Arc::new(DistanceService::new(
            locator,
            self.reference,
            self.open_store()?,
        )))
    }
}

#[cfg(feature = "locator-remote")]
fn register_remote(registry: &mut LocatorRegistry, url: &str, timeout: Duration) -> Result<()> {
    use crate::detect::{RemoteLocator, RemoteLocatorConfig};
    registry.register(RemoteLocator::new(RemoteLocatorConfig {
        url: url.to_string(),
        timeout,
    })?);
    Ok(())
}

#[cfg(not(feature = "locator-remote"))]
fn register_remote(_registry: &mut LocatorRegistry, url: &str, _timeout: Duration) -> Result<()> {
    log::warn!(
        "remote locator url {} ignored: built without the locator-remote feature",
        url
    );
    Ok(())
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<RangefinderConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
