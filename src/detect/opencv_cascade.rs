//! OpenCV-backed cascade detector (feature: detect-opencv).
//!
//! Runs the same `haarcascade_*.xml` models through
//! `objdetect::CascadeClassifier::detect_multi_scale` on the frame's
//! luminance plane.

use anyhow::{anyhow, Context, Result};
use opencv::{core, objdetect, prelude::*};
use std::path::Path;
use std::sync::Mutex;

use crate::frame::Frame;

use super::backend::FaceDetector;
use super::haar::DetectionParams;
use super::result::FaceBox;

pub struct OpenCvCascadeDetector {
    // detect_multi_scale needs `&mut self`; detection itself is `&self`.
    classifier: Mutex<objdetect::CascadeClassifier>,
    params: DetectionParams,
}

impl OpenCvCascadeDetector {
    pub fn from_path(path: &Path, params: DetectionParams) -> Result<Self> {
        let path_str = path
            .to_str()
            .with_context(|| format!("cascade path {} is not valid UTF-8", path.display()))?;
        let classifier = objdetect::CascadeClassifier::new(path_str)
            .with_context(|| format!("load cascade {}", path.display()))?;
        if classifier.empty()? {
            return Err(anyhow!("cascade {} could not be loaded", path.display()));
        }
        Ok(Self {
            classifier: Mutex::new(classifier),
            params,
        })
    }

    pub fn params(&self) -> DetectionParams {
        self.params
    }
}

impl FaceDetector for OpenCvCascadeDetector {
    fn name(&self) -> &'static str {
        "opencv-cascade"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<FaceBox>> {
        if frame.is_empty() {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        let rows = i32::try_from(frame.height()).context("frame height out of range")?;
        let cols = i32::try_from(frame.width()).context("frame width out of range")?;
        let luma = frame.to_luma();
        let gray = core::Mat::new_rows_cols_with_data(rows, cols, &luma)?.try_clone()?;

        let (min_w, min_h) = self.params.min_size;
        let min_size = core::Size::new(
            i32::try_from(min_w).unwrap_or(i32::MAX),
            i32::try_from(min_h).unwrap_or(i32::MAX),
        );
        let min_neighbors = i32::try_from(self.params.min_neighbors).unwrap_or(i32::MAX);

        let mut faces = core::Vector::<core::Rect>::new();
        let mut classifier = self
            .classifier
            .lock()
            .map_err(|_| anyhow!("cascade classifier lock poisoned"))?;
        classifier.detect_multi_scale(
            &gray,
            &mut faces,
            self.params.scale_factor as f64,
            min_neighbors,
            0,
            min_size,
            core::Size::default(),
        )?;

        Ok(faces.iter().filter_map(to_face_box).collect())
    }
}

fn to_face_box(rect: core::Rect) -> Option<FaceBox> {
    Some(FaceBox::new(
        u32::try_from(rect.x).ok()?,
        u32::try_from(rect.y).ok()?,
        u32::try_from(rect.width).ok()?,
        u32::try_from(rect.height).ok()?,
    ))
}
