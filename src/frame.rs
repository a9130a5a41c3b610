//! Decoded image container handed to object locators.
//!
//! Uploads arrive as encoded bytes (JPEG/PNG). They are decoded once into an
//! RGB8 `ImageFrame`; the encoded bytes are kept alongside so locators that
//! forward the image elsewhere do not need to re-encode it.

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;

/// Uploads above this size are rejected before decoding.
pub const MAX_IMAGE_BYTES: usize = 16 * 1024 * 1024;

pub struct ImageFrame {
    pixels: Vec<u8>,
    encoded: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl ImageFrame {
    /// Decode an uploaded image.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(anyhow!("empty image upload"));
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(anyhow!(
                "image upload of {} bytes exceeds {} byte limit",
                bytes.len(),
                MAX_IMAGE_BYTES
            ));
        }
        let image = image::load_from_memory(bytes).context("decode image")?;
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(anyhow!("image has zero dimensions"));
        }
        Ok(Self {
            pixels: image.into_rgb8().into_raw(),
            encoded: bytes.to_vec(),
            width,
            height,
        })
    }

    /// Build a frame from raw RGB8 pixels. The encoded form is empty.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            encoded: Vec::new(),
            width,
            height,
        })
    }

    /// RGB8 pixels, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bytes as uploaded; empty for frames built from raw pixels.
    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }
}

impl std::fmt::Debug for ImageFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoded_len", &self.encoded.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Encode an RGB8 buffer as PNG.
    pub(crate) fn encode_png(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
        let buf = image::RgbImage::from_raw(width, height, pixels.to_vec()).expect("rgb buffer");
        let mut out = Cursor::new(Vec::new());
        buf.write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn decodes_png_upload() {
        let pixels = vec![10u8; 4 * 2 * 3];
        let png = encode_png(&pixels, 4, 2);
        let frame = ImageFrame::decode(&png).unwrap();
        assert_eq!((frame.width, frame.height), (4, 2));
        assert_eq!(frame.pixels(), pixels.as_slice());
        assert_eq!(frame.encoded(), png.as_slice());
    }

    #[test]
    fn rejects_garbage_and_empty_uploads() {
        assert!(ImageFrame::decode(b"").is_err());
        assert!(ImageFrame::decode(b"definitely not an image").is_err());
    }

    #[test]
    fn raw_frames_validate_length() {
        assert!(ImageFrame::from_rgb(vec![0u8; 9], 1, 3).is_ok());
        assert!(ImageFrame::from_rgb(vec![0u8; 8], 1, 3).is_err());
    }
}
