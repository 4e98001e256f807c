//! Frame ingestion.
//!
//! This module owns the physical capture device:
//! - `FrameSource` walks an ordered list of device indices, opens the first
//!   one that works, warms it up, and hands out frames until the device fails
//! - Device backends sit behind `DeviceProvider` / `CaptureDevice`
//!   - synthetic devices (always available; demos and tests)
//!   - V4L2 devices (feature: ingest-v4l2)
//!
//! A `CaptureDevice` is the native handle. Dropping it releases the device,
//! so ownership alone guarantees release on every exit path.

mod camera;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
pub(crate) mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use camera::{CameraStatus, FrameSource, OpenAttempt, OpenOutcome, SourceSettings};
pub use synthetic::SyntheticProvider;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Provider;

/// Index meaning "whatever the backend considers its default device".
pub const DEFAULT_DEVICE_INDEX: i32 = -1;

/// Requested capture format. Devices may settle on something else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// An opened capture device.
pub trait CaptureDevice: Send {
    /// Human-readable device label for logs.
    fn label(&self) -> String;

    /// Apply the requested format. Errors are reported but not fatal to the
    /// device; callers decide whether to continue with driver defaults.
    fn configure(&mut self, format: &CaptureFormat) -> Result<()>;

    /// Capture the next frame.
    fn read_frame(&mut self) -> Result<Frame>;
}

/// Opens capture devices by index.
pub trait DeviceProvider: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn open(&mut self, index: i32) -> Result<Box<dyn CaptureDevice>>;
}

/// Capture backend selected by configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraBackend {
    Synthetic,
    V4l2,
}

impl CameraBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraBackend::Synthetic => "synthetic",
            CameraBackend::V4l2 => "v4l2",
        }
    }

    /// Build the device provider for this backend.
    pub fn provider(&self) -> Result<Box<dyn DeviceProvider>> {
        match self {
            CameraBackend::Synthetic => Ok(Box::new(SyntheticProvider::new(vec![0]))),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::V4l2 => Ok(Box::new(V4l2Provider::new())),
            #[cfg(not(feature = "ingest-v4l2"))]
            CameraBackend::V4l2 => Err(anyhow::anyhow!(
                "v4l2 capture requires building with the ingest-v4l2 feature"
            )),
        }
    }
}

impl Default for CameraBackend {
    fn default() -> Self {
        if cfg!(feature = "ingest-v4l2") {
            CameraBackend::V4l2
        } else {
            CameraBackend::Synthetic
        }
    }
}

impl std::str::FromStr for CameraBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "synthetic" | "stub" => Ok(CameraBackend::Synthetic),
            "v4l2" => Ok(CameraBackend::V4l2),
            other => Err(anyhow::anyhow!("unknown camera backend '{}'", other)),
        }
    }
}
