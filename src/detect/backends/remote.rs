#![cfg(feature = "locator-remote")]

//! Remote object locator.
//!
//! Forwards the uploaded image to an HTTP detection service and parses its
//! predictions. The accepted response is the COCO-SSD prediction list
//! (`[{"bbox": [x, y, w, h], "class": "...", "score": 0.9}]`), either bare or
//! wrapped as `{"predictions": [...]}`.

use std::io::Cursor;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::detect::locator::ObjectLocator;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::ImageFrame;

#[derive(Clone, Debug)]
pub struct RemoteLocatorConfig {
    /// Detection endpoint. Supported schemes: http, https.
    pub url: String,
    /// Per-request I/O timeout.
    pub timeout: Duration,
}

impl Default for RemoteLocatorConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8501/detect".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CocoPrediction {
    bbox: [f64; 4],
    #[serde(default)]
    class: Option<String>,
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictionPayload {
    Bare(Vec<CocoPrediction>),
    Wrapped { predictions: Vec<CocoPrediction> },
}

pub struct RemoteLocator {
    url: String,
    timeout: Duration,
}

impl RemoteLocator {
    pub fn new(config: RemoteLocatorConfig) -> Result<Self> {
        let url = Url::parse(&config.url).context("parse locator url")?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported locator scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        Ok(Self {
            url: config.url,
            timeout: config.timeout,
        })
    }

    fn request_body(image: &ImageFrame) -> Result<(Vec<u8>, &'static str)> {
        let encoded = image.encoded();
        if !encoded.is_empty() {
            return Ok((encoded.to_vec(), sniff_content_type(encoded)));
        }
        let buf = image::RgbImage::from_raw(image.width, image.height, image.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let mut out = Cursor::new(Vec::new());
        buf.write_to(&mut out, image::ImageFormat::Png)
            .context("encode frame for remote locator")?;
        Ok((out.into_inner(), "image/png"))
    }
}

impl ObjectLocator for RemoteLocator {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn detect(&self, image: &ImageFrame) -> Result<Vec<Detection>> {
        let (body, content_type) = Self::request_body(image)?;
        let response = ureq::post(&self.url)
            .timeout(self.timeout)
            .set("Content-Type", content_type)
            .send_bytes(&body)
            .with_context(|| format!("post image to locator {}", self.url))?;
        let text = response
            .into_string()
            .context("read locator response")?;
        parse_predictions(&text)
    }
}

fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if bytes.starts_with(b"\x89PNG") {
        "image/png"
    } else {
        "application/octet-stream"
    }
}

pub(crate) fn parse_predictions(text: &str) -> Result<Vec<Detection>> {
    let payload: PredictionPayload =
        serde_json::from_str(text).map_err(|e| anyhow!("invalid locator response: {}", e))?;
    let predictions = match payload {
        PredictionPayload::Bare(list) => list,
        PredictionPayload::Wrapped { predictions } => predictions,
    };
    Ok(predictions
        .into_iter()
        .map(|p| {
            let [x, y, w, h] = p.bbox;
            let det = Detection::new(BoundingBox::new(x, y, w, h), p.score);
            match p.class {
                Some(class) => det.with_label(class),
                None => det,
            }
        })
        .collect())
}
