use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::ExtendedColorType;

use crate::frame::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// JPEG encoder at a fixed quality.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Result<Self> {
        if !(1..=100).contains(&quality) {
            return Err(anyhow!("jpeg quality must be in 1..=100, got {}", quality));
        }
        Ok(Self { quality })
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn try_encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        if frame.is_empty() {
            return Err(anyhow!("cannot encode an empty frame"));
        }
        let mut out = Vec::new();
        ImageJpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(
                frame.data(),
                frame.width(),
                frame.height(),
                ExtendedColorType::Rgb8,
            )
            .context("jpeg encode")?;
        Ok(out)
    }

    /// Encode, or log an `EncodeFailure` and return an empty payload.
    pub fn encode(&self, frame: &Frame) -> Vec<u8> {
        match self.try_encode(frame) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("EncodeFailure: {:#}", err);
                Vec::new()
            }
        }
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}
