use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::annotate::{annotate, status_line, unavailable_frame};
use crate::detect::{detect_faces, FaceDetector};
use crate::encode::JpegEncoder;
use crate::frame::Frame;
use crate::ingest::FrameSource;

use super::multipart::frame_part;

const RATE_SMOOTHING: f64 = 0.1;

/// Exponential moving average of the frame rate.
#[derive(Debug, Default)]
struct RateMeter {
    last: Option<Instant>,
    fps: f64,
}

impl RateMeter {
    fn tick(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last.replace(now) {
            let dt = now.duration_since(last).as_secs_f64();
            if dt > 0.0 {
                let instant = 1.0 / dt;
                self.fps = if self.fps == 0.0 {
                    instant
                } else {
                    self.fps + RATE_SMOOTHING * (instant - self.fps)
                };
            }
        }
        self.fps
    }
}

/// Detect, annotate and encode frames into multipart chunks.
pub struct FramePipeline {
    detector: Arc<dyn FaceDetector>,
    encoder: JpegEncoder,
    rate: RateMeter,
    frame_interval: Option<Duration>,
    last_emit: Option<Instant>,
}

impl FramePipeline {
    pub fn new(detector: Arc<dyn FaceDetector>, encoder: JpegEncoder) -> Self {
        Self {
            detector,
            encoder,
            rate: RateMeter::default(),
            frame_interval: None,
            last_emit: None,
        }
    }

    /// Cap output at `fps` frames per second. Zero disables pacing.
    pub fn with_max_fps(mut self, fps: u32) -> Self {
        self.frame_interval = (fps > 0).then(|| Duration::from_secs_f64(1.0 / fps as f64));
        self
    }

    pub fn detector(&self) -> &Arc<dyn FaceDetector> {
        &self.detector
    }

    /// Full per-frame path. `None` when the encoder produced nothing.
    pub fn render(&mut self, frame: &Frame) -> Option<Vec<u8>> {
        // An unloaded detector was already reported at startup.
        let boxes = if self.detector.is_ready() {
            detect_faces(self.detector.as_ref(), frame)
        } else {
            Vec::new()
        };
        let fps = self.rate.tick(Instant::now());
        let annotated = annotate(frame, &boxes, Some(&status_line(boxes.len(), fps)));
        self.wrap(&annotated)
    }

    /// Chunk carrying the "camera not available" frame.
    pub fn unavailable_chunk(&self, width: u32, height: u32) -> Option<Vec<u8>> {
        self.wrap(&unavailable_frame(width, height))
    }

    fn wrap(&self, frame: &Frame) -> Option<Vec<u8>> {
        let jpeg = self.encoder.encode(frame);
        (!jpeg.is_empty()).then(|| frame_part(&jpeg))
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_emit) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_emit = Some(Instant::now());
    }
}

enum StreamState {
    Fresh,
    Streaming,
    Finished,
}

/// Lazy stream of multipart chunks over one source.
///
/// A source that is not ready at the first poll produces exactly one
/// "camera not available" chunk. A failed read closes the source and ends the
/// stream. Once finished the stream stays finished.
pub struct FrameStream<'a> {
    source: &'a mut FrameSource,
    pipeline: &'a mut FramePipeline,
    state: StreamState,
}

impl<'a> FrameStream<'a> {
    pub fn new(source: &'a mut FrameSource, pipeline: &'a mut FramePipeline) -> Self {
        Self {
            source,
            pipeline,
            state: StreamState::Fresh,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, StreamState::Finished)
    }
}

impl Iterator for FrameStream<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if let StreamState::Fresh = self.state {
            if !self.source.is_ready() {
                self.state = StreamState::Finished;
                let format = self.source.settings().format;
                return self.pipeline.unavailable_chunk(format.width, format.height);
            }
            self.state = StreamState::Streaming;
        }

        while let StreamState::Streaming = self.state {
            self.pipeline.pace();
            let Some(frame) = self.source.read() else {
                self.source.close();
                self.state = StreamState::Finished;
                break;
            };
            if let Some(chunk) = self.pipeline.render(&frame) {
                return Some(chunk);
            }
        }
        None
    }
}

impl std::iter::FusedIterator for FrameStream<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionParams, FaceBox, HaarCascadeDetector};
    use crate::ingest::{SourceSettings, SyntheticProvider};
    use anyhow::Result;

    struct FixedDetector(Vec<FaceBox>);

    impl FaceDetector for FixedDetector {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&self, _frame: &Frame) -> Result<Vec<FaceBox>> {
            Ok(self.0.clone())
        }
    }

    fn settings(preferred: i32) -> SourceSettings {
        SourceSettings {
            preferred_index: preferred,
            fallback_indices: Vec::new(),
            warmup_frames: 1,
            ..SourceSettings::default()
        }
    }

    fn pipeline() -> FramePipeline {
        FramePipeline::new(
            Arc::new(FixedDetector(vec![FaceBox::new(10, 10, 40, 40)])),
            JpegEncoder::default(),
        )
    }

    fn is_part(chunk: &[u8]) -> bool {
        chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8")
            && chunk.ends_with(b"\xFF\xD9\r\n")
    }

    #[test]
    fn degraded_source_yields_single_chunk() {
        let mut source = FrameSource::new(Box::new(SyntheticProvider::new(vec![])), settings(0));
        assert!(!source.open().is_ready());
        let mut pipeline = pipeline();

        let chunks: Vec<Vec<u8>> = FrameStream::new(&mut source, &mut pipeline).collect();

        assert_eq!(chunks.len(), 1);
        assert!(is_part(&chunks[0]));
    }

    #[test]
    fn stream_ends_and_releases_on_read_failure() {
        let provider = SyntheticProvider::new(vec![0]).with_frame_limit(4);
        let mut source = FrameSource::new(Box::new(provider), settings(0));
        assert!(source.open().is_ready());
        let mut pipeline = pipeline();

        let mut stream = FrameStream::new(&mut source, &mut pipeline);
        let chunks: Vec<Vec<u8>> = stream.by_ref().collect();
        assert!(stream.is_finished());
        assert_eq!(stream.next(), None);
        drop(stream);

        // One warm-up read, then three streamed frames.
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| is_part(c)));
        assert!(!source.is_ready());
    }

    #[test]
    fn unloaded_detector_still_streams() {
        let provider = SyntheticProvider::new(vec![0]).with_frame_limit(3);
        let mut source = FrameSource::new(Box::new(provider), settings(0));
        source.open();
        let mut pipeline = FramePipeline::new(
            Arc::new(HaarCascadeDetector::unloaded(DetectionParams::default())),
            JpegEncoder::default(),
        );
        assert_eq!(FrameStream::new(&mut source, &mut pipeline).count(), 2);
    }

    #[test]
    fn rate_meter_smooths() {
        let mut meter = RateMeter::default();
        let t0 = Instant::now();
        assert_eq!(meter.tick(t0), 0.0);
        let first = meter.tick(t0 + Duration::from_millis(100));
        assert!((first - 10.0).abs() < 1e-6);
        let second = meter.tick(t0 + Duration::from_millis(150));
        assert!(second > 10.0 && second < 20.0);
    }

    #[test]
    fn pacing_limits_rate() {
        let provider = SyntheticProvider::new(vec![0]).with_frame_limit(5);
        let mut source = FrameSource::new(Box::new(provider), settings(0));
        source.open();
        let mut pipeline = pipeline().with_max_fps(50);
        let started = Instant::now();
        let n = FrameStream::new(&mut source, &mut pipeline).count();
        assert_eq!(n, 4);
        assert!(started.elapsed() >= Duration::from_millis(55));
    }
}
