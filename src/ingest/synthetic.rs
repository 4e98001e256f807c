//! Synthetic capture devices.
//!
//! `SyntheticProvider` pretends a fixed set of device indices exists and
//! generates a deterministic scene for each opened device:
//! - a static vertical gradient background
//! - a bright square drifting across the frame (so consecutive frames differ)
//!
//! Used by `camera.backend = "synthetic"` for hardware-free demos and by tests.

use anyhow::{anyhow, Result};

use super::normalize::{to_frame, PixelFormat};
use super::{CaptureDevice, CaptureFormat, DeviceProvider, DEFAULT_DEVICE_INDEX};
use crate::frame::Frame;

const SQUARE_SIZE: u32 = 48;

#[derive(Clone, Debug)]
pub struct SyntheticProvider {
    available: Vec<i32>,
    frame_limit: Option<u64>,
    limits_at: Vec<(i32, u64)>,
}

impl SyntheticProvider {
    /// Devices exist only at the given indices.
    pub fn new(available: Vec<i32>) -> Self {
        Self {
            available,
            frame_limit: None,
            limits_at: Vec::new(),
        }
    }

    /// Devices fail every read after `limit` frames (warm-up reads included).
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Like `with_frame_limit`, for the device at `index` only. Takes
    /// precedence over the provider-wide limit.
    pub fn with_frame_limit_at(mut self, index: i32, limit: u64) -> Self {
        self.limits_at.retain(|(i, _)| *i != index);
        self.limits_at.push((index, limit));
        self
    }

    fn limit_for(&self, index: i32) -> Option<u64> {
        self.limits_at
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, limit)| *limit)
            .or(self.frame_limit)
    }

    fn resolve(&self, index: i32) -> Option<i32> {
        if index == DEFAULT_DEVICE_INDEX {
            return self.available.iter().copied().filter(|i| *i >= 0).min();
        }
        self.available.contains(&index).then_some(index)
    }
}

impl DeviceProvider for SyntheticProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&mut self, index: i32) -> Result<Box<dyn CaptureDevice>> {
        let resolved = self
            .resolve(index)
            .ok_or_else(|| anyhow!("no synthetic device at index {}", index))?;
        Ok(Box::new(SyntheticDevice {
            index: resolved,
            format: CaptureFormat::default(),
            frame_count: 0,
            frame_limit: self.limit_for(resolved),
        }))
    }
}

struct SyntheticDevice {
    index: i32,
    format: CaptureFormat,
    frame_count: u64,
    frame_limit: Option<u64>,
}

impl SyntheticDevice {
    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.format.width as usize;
        let height = self.format.height as usize;
        let mut pixels = vec![0u8; width * height * 3];

        for (y, row) in pixels.chunks_exact_mut(width * 3).enumerate() {
            let shade = (40 + (y * 120) / height.max(1)) as u8;
            for px in row.chunks_exact_mut(3) {
                px[0] = shade;
                px[1] = shade;
                px[2] = shade.saturating_add(20);
            }
        }

        let span = self.format.width.saturating_sub(SQUARE_SIZE).max(1) as u64;
        let left = (self.frame_count * 4 % span) as usize;
        let top = height.saturating_sub(SQUARE_SIZE as usize) / 2;
        for y in top..(top + SQUARE_SIZE as usize).min(height) {
            for x in left..(left + SQUARE_SIZE as usize).min(width) {
                let idx = (y * width + x) * 3;
                pixels[idx..idx + 3].copy_from_slice(&[230, 210, 190]);
            }
        }

        pixels
    }
}

impl CaptureDevice for SyntheticDevice {
    fn label(&self) -> String {
        format!("synthetic://{}", self.index)
    }

    fn configure(&mut self, format: &CaptureFormat) -> Result<()> {
        if format.width == 0 || format.height == 0 {
            return Err(anyhow!("synthetic devices need a non-empty frame size"));
        }
        self.format = *format;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if let Some(limit) = self.frame_limit {
            if self.frame_count >= limit {
                return Err(anyhow!("{} stopped delivering frames", self.label()));
            }
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        to_frame(
            &pixels,
            self.format.width,
            self.format.height,
            PixelFormat::Rgb24,
        )
    }
}
