//! Owned video frames.
//!
//! A `Frame` is a fixed-size RGB8 pixel grid in row-major order. Frames are
//! produced by capture devices and never mutated in place by the pipeline:
//! the annotator always draws onto a copy, so the captured frame can still be
//! handed to a recognizer after the overlay has been rendered.

use anyhow::{anyhow, Result};
use image::RgbImage;

/// Bytes per pixel (R, G, B).
pub const CHANNELS: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap an RGB8 buffer. The buffer length must equal `width * height * 3`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * CHANNELS;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} rgb",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// All-black frame of the given size.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; (width as usize) * (height as usize) * CHANNELS],
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// RGB triple at `(x, y)`. Panics when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = ((y as usize) * (self.width as usize) + x as usize) * CHANNELS;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    /// Single-channel luminance plane (ITU-R BT.601 integer approximation).
    pub fn to_luma(&self) -> Vec<u8> {
        self.data
            .chunks_exact(CHANNELS)
            .map(|px| {
                let y = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32;
                (y >> 8) as u8
            })
            .collect()
    }

    /// Copy into an `image` buffer for drawing and encoding.
    pub fn to_image(&self) -> RgbImage {
        // Length is validated at construction, so this cannot fail.
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn luma_weights_green_heaviest() {
        let frame = Frame::new(vec![255, 0, 0, 0, 255, 0, 0, 0, 255], 3, 1).unwrap();
        let luma = frame.to_luma();
        assert!(luma[1] > luma[0]);
        assert!(luma[0] > luma[2]);
    }

    #[test]
    fn image_conversion_keeps_pixels() {
        let data = (0..4 * 3 * 3).map(|i| (i * 7 % 251) as u8).collect();
        let frame = Frame::new(data, 4, 3).unwrap();
        let back = Frame::from_image(frame.to_image());
        assert_eq!(back, frame);
    }
}
