use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;

use crate::frame::Frame;

use super::backend::FaceDetector;
use super::cascade::{Cascade, HaarFeature};
use super::grouping::group_boxes;
use super::integral::IntegralImage;
use super::result::FaceBox;

/// Windows flatter than this (luma standard deviation) are rejected outright.
const MIN_WINDOW_STDDEV: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionParams {
    /// Window growth per pyramid level. Must be > 1.0.
    pub scale_factor: f32,
    /// Neighbor votes a cluster needs beyond its first hit.
    pub min_neighbors: u32,
    /// Smallest reported box (width, height).
    pub min_size: (u32, u32),
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.3,
            min_neighbors: 5,
            min_size: (30, 30),
        }
    }
}

/// Viola-Jones style detector over a Haar cascade.
#[derive(Clone, Debug)]
pub struct HaarCascadeDetector {
    cascade: Option<Arc<Cascade>>,
    params: DetectionParams,
}

struct ScaledRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

impl HaarCascadeDetector {
    pub fn new(cascade: Cascade, params: DetectionParams) -> Self {
        Self {
            cascade: Some(Arc::new(cascade)),
            params,
        }
    }

    pub fn from_path(path: &Path, params: DetectionParams) -> Result<Self> {
        Ok(Self::new(Cascade::from_path(path)?, params))
    }

    /// Detector without a model. Every `detect` call reports an error.
    pub fn unloaded(params: DetectionParams) -> Self {
        Self {
            cascade: None,
            params,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cascade.is_some()
    }

    pub fn params(&self) -> DetectionParams {
        self.params
    }

    fn scan(&self, cascade: &Cascade, ii: &IntegralImage) -> Vec<FaceBox> {
        let (win_w, win_h) = cascade.window_size();
        let (min_w, min_h) = self.params.min_size;
        let factor = self.params.scale_factor as f64;
        let mut hits = Vec::new();

        let mut scale = 1.0f64;
        loop {
            let w = (win_w as f64 * scale).round() as u32;
            let h = (win_h as f64 * scale).round() as u32;
            if w > ii.width() || h > ii.height() {
                break;
            }
            if w >= min_w && h >= min_h {
                let step_px = if scale <= 2.0 { 2.0 } else { 1.0 };
                let step = ((scale * step_px).round() as u32).max(1);
                let features: Vec<Vec<ScaledRect>> = cascade
                    .features()
                    .iter()
                    .map(|f| scale_feature(f, scale, w, h))
                    .collect();

                let mut y = 0;
                while y + h <= ii.height() {
                    let mut x = 0;
                    while x + w <= ii.width() {
                        if window_passes(cascade, &features, ii, x, y, w, h) {
                            hits.push(FaceBox::new(x, y, w, h));
                        }
                        x += step;
                    }
                    y += step;
                }
            }
            scale *= factor;
        }

        hits
    }
}

impl FaceDetector for HaarCascadeDetector {
    fn name(&self) -> &'static str {
        "haar-cascade"
    }

    fn is_ready(&self) -> bool {
        self.is_loaded()
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<FaceBox>> {
        let cascade = self
            .cascade
            .as_deref()
            .ok_or_else(|| anyhow!("cascade classifier not loaded"))?;
        if frame.is_empty() {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        if self.params.scale_factor <= 1.0 {
            return Err(anyhow!(
                "scale factor must be > 1.0, got {}",
                self.params.scale_factor
            ));
        }

        let luma = frame.to_luma();
        let ii = IntegralImage::new(&luma, frame.width(), frame.height());
        let hits = self.scan(cascade, &ii);
        Ok(group_boxes(&hits, self.params.min_neighbors))
    }
}

/// Scale a feature to a `win_w x win_h` window. Rectangles are clamped so
/// they never leave the window.
fn scale_feature(feature: &HaarFeature, scale: f64, win_w: u32, win_h: u32) -> Vec<ScaledRect> {
    let px = |v: u32| (v as f64 * scale).round() as u32;
    let mut rects: Vec<ScaledRect> = feature
        .rects
        .iter()
        .map(|r| {
            let x = px(r.x).min(win_w - 1);
            let y = px(r.y).min(win_h - 1);
            ScaledRect {
                x,
                y,
                width: px(r.width).clamp(1, win_w - x),
                height: px(r.height).clamp(1, win_h - y),
                weight: r.weight as f64,
            }
        })
        .collect();

    // Rounding skews rectangle areas; re-balance the first weight so a flat
    // patch still evaluates to zero.
    if rects.len() > 1 {
        let area = |r: &ScaledRect| (r.width * r.height) as f64;
        let rest: f64 = rects[1..].iter().map(|r| r.weight * area(r)).sum();
        let base_area = area(&rects[0]);
        let original: f64 = feature
            .rects
            .iter()
            .map(|r| r.weight as f64 * (r.width * r.height) as f64)
            .sum();
        if original.abs() < 1e-6 && base_area > 0.0 {
            rects[0].weight = -rest / base_area;
        }
    }
    rects
}

fn window_passes(
    cascade: &Cascade,
    features: &[Vec<ScaledRect>],
    ii: &IntegralImage,
    x: u32,
    y: u32,
    w: u32,
    h: u32,
) -> bool {
    let area = (w as f64) * (h as f64);
    let sum = ii.rect_sum(x, y, w, h) as f64;
    let sq_sum = ii.rect_sq_sum(x, y, w, h) as f64;
    let variance_term = area * sq_sum - sum * sum;
    // variance_term = (area * stddev)^2
    if variance_term <= (area * MIN_WINDOW_STDDEV).powi(2) {
        return false;
    }
    let norm = variance_term.sqrt();

    for stage in cascade.stages() {
        let mut stage_sum = 0.0f64;
        for weak in &stage.classifiers {
            let value: f64 = features[weak.feature]
                .iter()
                .map(|r| r.weight * ii.rect_sum(x + r.x, y + r.y, r.width, r.height) as f64)
                .sum();
            stage_sum += if value < weak.threshold as f64 * norm {
                weak.left as f64
            } else {
                weak.right as f64
            };
        }
        if stage_sum < stage.threshold as f64 {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::cascade::tests::TWO_STAGE_XML;

    fn edge_detector(min_neighbors: u32) -> HaarCascadeDetector {
        let cascade = Cascade::parse_opencv_xml(TWO_STAGE_XML).unwrap();
        HaarCascadeDetector::new(
            cascade,
            DetectionParams {
                scale_factor: 1.25,
                min_neighbors,
                min_size: (4, 4),
            },
        )
    }

    /// Dark upper half, bright lower half.
    fn edge_frame(width: u32, height: u32) -> Frame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            let v = if y < height / 2 { 0 } else { 200 };
            for _ in 0..width {
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(data, width, height).unwrap()
    }

    #[test]
    fn blank_frame_has_no_faces() -> Result<()> {
        let detector = edge_detector(0);
        assert!(detector.detect(&Frame::blank(64, 48))?.is_empty());
        Ok(())
    }

    #[test]
    fn hits_straddle_the_edge() -> Result<()> {
        let detector = edge_detector(0);
        let boxes = detector.detect(&edge_frame(40, 40))?;
        assert!(!boxes.is_empty());
        for b in &boxes {
            assert!(b.y < 20 && b.bottom() > 20, "box {b:?} misses the edge");
        }
        Ok(())
    }

    #[test]
    fn overlapping_edge_hits_collapse_into_one_box() -> Result<()> {
        let frame = edge_frame(40, 40);
        let raw = edge_detector(0).detect(&frame)?;
        assert!(raw.len() > 50, "expected a dense run of hits, got {}", raw.len());

        // Neighboring hits chain into a single cluster and are averaged.
        let grouped = edge_detector(50).detect(&frame)?;
        assert_eq!(grouped.len(), 1, "{grouped:?}");
        let face = grouped[0];
        assert!(face.y < 20 && face.bottom() > 20, "box {face:?} misses the edge");

        // A cluster never has more votes than there are raw hits.
        let too_strict = raw.len() as u32;
        assert!(edge_detector(too_strict).detect(&frame)?.is_empty());
        Ok(())
    }

    #[test]
    fn min_size_larger_than_frame_finds_nothing() -> Result<()> {
        let mut detector = edge_detector(0);
        detector.params.min_size = (100, 100);
        assert!(detector.detect(&edge_frame(40, 40))?.is_empty());
        Ok(())
    }

    #[test]
    fn unloaded_detector_reports_error() {
        let detector = HaarCascadeDetector::unloaded(DetectionParams::default());
        assert!(!detector.is_loaded());
        assert!(detector.detect(&Frame::blank(8, 8)).is_err());
    }

    #[test]
    fn missing_cascade_file_is_a_load_error() {
        let result = HaarCascadeDetector::from_path(
            Path::new("/nonexistent/haarcascade.xml"),
            DetectionParams::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn detection_leaves_frame_untouched() -> Result<()> {
        let frame = edge_frame(40, 40);
        let before = frame.clone();
        edge_detector(0).detect(&frame)?;
        assert_eq!(frame, before);
        Ok(())
    }
}
