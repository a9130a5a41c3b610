//! rangefinder - one-shot calibration and measurement from image files.
//!
//! Uses the same configuration as `rangefinderd`. With `store.db_path`
//! configured, calibrations persist between invocations, so a `calibrate`
//! followed by a `measure` for the same session behaves like the HTTP API.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rangefinder::detect::detect_with_timeout;
use rangefinder::service::MeasurementRequest;
use rangefinder::{EstimationError, ImageFrame, RangefinderConfig, SessionId};

#[derive(Parser, Debug)]
#[command(
    name = "rangefinder",
    about = "Estimate camera-to-object distance from a single image"
)]
struct Args {
    /// Locator backend to use instead of the configured default
    #[arg(long, global = true, value_name = "NAME")]
    locator: Option<String>,

    /// Session whose calibration is read or written
    #[arg(long, global = true, default_value = "default", env = "RANGEFINDER_SESSION")]
    session: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate from an image of the reference object at a known distance
    Calibrate {
        #[arg(long, value_name = "PATH")]
        image: PathBuf,
        /// Distance from camera to the reference object, in cm
        #[arg(long, value_name = "CM")]
        distance: Option<f64>,
        /// True width of the reference object, in cm
        #[arg(long, value_name = "CM")]
        width: Option<f64>,
    },
    /// Measure the distance to the reference object
    Measure {
        #[arg(long, value_name = "PATH")]
        image: PathBuf,
        /// Use this focal length instead of the stored session calibration
        #[arg(long, value_name = "PX")]
        focal_length: Option<f64>,
    },
    /// Forget the session calibration
    Reset,
    /// Print the session calibration state
    Status,
    /// Print raw locator output for an image, without selection
    Detect {
        #[arg(long, value_name = "PATH")]
        image: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let config = RangefinderConfig::load()?;
    let registry = config.build_registry()?;
    let session = SessionId::parse(&args.session)?;

    let service = config.build_service(&registry, args.locator.as_deref())?;
    let outcome = match args.command {
        Command::Calibrate {
            image,
            distance,
            width,
        } => {
            let frame = Arc::new(load_image(&image)?);
            service
                .calibrate(&session, frame, distance, width)
                .map(|profile| {
                    json!({
                        "success": true,
                        "session_id": session.as_str(),
                        "focal_length": profile.focal_length_px,
                        "profile": profile,
                    })
                })
        }
        Command::Measure {
            image,
            focal_length,
        } => {
            let request = MeasurementRequest {
                image: Arc::new(load_image(&image)?),
                focal_length_px: focal_length,
            };
            service.measure(&session, request).map(|result| {
                json!({
                    "success": true,
                    "session_id": session.as_str(),
                    "distance": result.distance_cm,
                    "apparent_width_px": result.apparent_width_px,
                    "confidence": result.confidence,
                })
            })
        }
        Command::Reset => service.reset(&session).map(|was_calibrated| {
            json!({
                "success": true,
                "session_id": session.as_str(),
                "was_calibrated": was_calibrated,
            })
        }),
        Command::Status => service.state(&session).map(|state| {
            json!({
                "success": true,
                "session_id": session.as_str(),
                "calibrated": state.is_calibrated(),
                "profile": state.profile(),
            })
        }),
        Command::Detect { image } => {
            let frame = Arc::new(load_image(&image)?);
            let locator = registry.resolve(args.locator.as_deref())?;
            detect_with_timeout(locator, frame, config.locator.timeout).map(|detections| {
                json!({
                    "success": true,
                    "detections": detections,
                })
            })
        }
    };

    match outcome {
        Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Err(err) => {
            let body = failure(&session, &err);
            println!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(if err.is_recoverable() { 2 } else { 1 });
        }
    }
}

fn failure(session: &SessionId, err: &EstimationError) -> serde_json::Value {
    json!({
        "success": false,
        "session_id": session.as_str(),
        "error": err.code(),
        "message": err.to_string(),
    })
}

fn load_image(path: &Path) -> Result<ImageFrame> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read image {}", path.display()))?;
    ImageFrame::decode(&bytes).with_context(|| format!("decode image {}", path.display()))
}
