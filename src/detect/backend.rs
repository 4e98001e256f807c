use anyhow::Result;

use crate::frame::Frame;

use super::result::FaceBox;

/// Face detector backend.
///
/// Detectors are stateless per call: `detect` takes `&self`, never mutates the
/// frame and keeps nothing between calls, so one instance can serve several
/// threads.
pub trait FaceDetector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// False when the backend has no model and every call would fail.
    fn is_ready(&self) -> bool {
        true
    }

    /// Find face regions in a frame.
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceBox>>;
}
