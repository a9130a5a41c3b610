//! rangefinderd - HTTP distance estimation daemon
//!
//! This daemon:
//! 1. Loads configuration (`RANGEFINDER_CONFIG` plus env overrides)
//! 2. Registers the object locators and selects the configured backend
//! 3. Opens the calibration profile store
//! 4. Serves the calibrate/measure API until Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::mpsc;

use rangefinder::api::ApiServer;
use rangefinder::RangefinderConfig;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RangefinderConfig::load()?;
    let registry = config.build_registry()?;
    if let Err(err) = registry.warm_up_all() {
        log::warn!("locator warm-up failed: {}", err);
    }
    log::info!(
        "object locators: {} (default: {})",
        registry.list().join(", "),
        registry.default_name().unwrap_or("none")
    );

    let service = config.build_service(&registry, None)?;
    match &config.db_path {
        Some(path) => log::info!("calibration profiles persisted to {}", path),
        None => log::warn!("no store.db_path configured; calibration profiles are kept in memory"),
    }

    let api_handle = ApiServer::new(config.api.clone(), service).spawn()?;
    log::info!("distance api listening on {}", api_handle.addr);
    log::info!(
        "reference object {:.1}cm wide, default calibration distance {:.1}cm",
        config.reference.object_width_cm,
        config.reference.distance_cm
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("rangefinderd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
