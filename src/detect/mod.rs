//! Face detection.
//!
//! `FaceDetector` is the backend seam:
//! - `HaarCascadeDetector`: pure-Rust cascade evaluation (always available)
//! - `OpenCvCascadeDetector`: OpenCV `CascadeClassifier` (feature: detect-opencv)
//!
//! The stream pipeline goes through `detect_faces`, which folds a detector
//! error into an empty result so the frame is still shown.

mod backend;
mod cascade;
mod grouping;
mod haar;
mod integral;
#[cfg(feature = "detect-opencv")]
mod opencv_cascade;
mod result;

pub use backend::FaceDetector;
pub use cascade::{Cascade, HaarFeature, HaarRect, Stage, WeakClassifier};
pub use haar::{DetectionParams, HaarCascadeDetector};
#[cfg(feature = "detect-opencv")]
pub use opencv_cascade::OpenCvCascadeDetector;
pub use result::FaceBox;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::frame::Frame;

/// Detector implementation selected by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetectorKind {
    #[default]
    Haar,
    OpenCv,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Haar => "haar",
            DetectorKind::OpenCv => "opencv",
        }
    }

    /// Load the cascade at `path` with this implementation.
    pub fn load(&self, path: &Path, params: DetectionParams) -> Result<Arc<dyn FaceDetector>> {
        match self {
            DetectorKind::Haar => Ok(Arc::new(HaarCascadeDetector::from_path(path, params)?)),
            #[cfg(feature = "detect-opencv")]
            DetectorKind::OpenCv => Ok(Arc::new(OpenCvCascadeDetector::from_path(path, params)?)),
            #[cfg(not(feature = "detect-opencv"))]
            DetectorKind::OpenCv => Err(anyhow::anyhow!(
                "opencv detection requires building with the detect-opencv feature"
            )),
        }
    }
}

impl std::str::FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "haar" => Ok(DetectorKind::Haar),
            "opencv" => Ok(DetectorKind::OpenCv),
            other => Err(anyhow::anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

/// Load a detector, or fall back to an unloaded one so the stream keeps
/// running without detections.
pub fn load_detector(
    kind: DetectorKind,
    path: &Path,
    params: DetectionParams,
) -> Arc<dyn FaceDetector> {
    match kind.load(path, params) {
        Ok(detector) => {
            log::info!(
                "face detector {} initialized from {}",
                detector.name(),
                path.display()
            );
            detector
        }
        Err(err) => {
            log::error!("face detector unavailable ({}): {:#}", kind.as_str(), err);
            Arc::new(HaarCascadeDetector::unloaded(params))
        }
    }
}

/// Run `detector` over `frame`. A detector error is logged as a
/// `DetectionFailure` and reported as zero faces.
pub fn detect_faces(detector: &dyn FaceDetector, frame: &Frame) -> Vec<FaceBox> {
    match detector.detect(frame) {
        Ok(boxes) => boxes,
        Err(err) => {
            log::warn!("DetectionFailure ({}): {:#}", detector.name(), err);
            Vec::new()
        }
    }
}
