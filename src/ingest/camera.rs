//! Camera lifecycle: ordered discovery, warm-up, reads, release.

use crate::frame::Frame;

use super::{CaptureDevice, CaptureFormat, DeviceProvider, DEFAULT_DEVICE_INDEX};

const DEFAULT_FALLBACK_INDICES: [i32; 3] = [1, 2, DEFAULT_DEVICE_INDEX];
const DEFAULT_WARMUP_FRAMES: u32 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    /// Index tried first.
    pub preferred_index: i32,
    /// Indices tried, in order, after the preferred one.
    pub fallback_indices: Vec<i32>,
    pub format: CaptureFormat,
    /// Frames discarded after opening so auto-exposure can settle.
    pub warmup_frames: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            preferred_index: 0,
            fallback_indices: DEFAULT_FALLBACK_INDICES.to_vec(),
            format: CaptureFormat::default(),
            warmup_frames: DEFAULT_WARMUP_FRAMES,
        }
    }
}

impl SourceSettings {
    /// Preferred index followed by fallbacks, first occurrence wins.
    pub fn candidate_indices(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(1 + self.fallback_indices.len());
        for index in std::iter::once(self.preferred_index).chain(self.fallback_indices.iter().copied()) {
            if !out.contains(&index) {
                out.push(index);
            }
        }
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    Failed(String),
}

/// Result of trying one candidate index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenAttempt {
    pub index: i32,
    pub outcome: OpenOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraStatus {
    Ready { index: i32 },
    Unavailable { attempts: Vec<OpenAttempt> },
}

impl CameraStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, CameraStatus::Ready { .. })
    }
}

struct ActiveDevice {
    index: i32,
    device: Box<dyn CaptureDevice>,
}

/// Exclusive owner of the capture device.
pub struct FrameSource {
    provider: Box<dyn DeviceProvider>,
    settings: SourceSettings,
    active: Option<ActiveDevice>,
    frames_read: u64,
}

impl FrameSource {
    pub fn new(provider: Box<dyn DeviceProvider>, settings: SourceSettings) -> Self {
        Self {
            provider,
            settings,
            active: None,
            frames_read: 0,
        }
    }

    pub fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    /// Try every candidate index in order and keep the first device that opens
    /// and survives warm-up. Any previously held device is released first.
    pub fn open(&mut self) -> CameraStatus {
        self.close();

        let mut attempts = Vec::new();
        for index in self.settings.candidate_indices() {
            log::info!(
                "camera: attempting {} device at index {}",
                self.provider.name(),
                index
            );
            match self.try_candidate(index) {
                Ok(device) => {
                    log::info!("camera: initialized {} at index {}", device.label(), index);
                    self.active = Some(ActiveDevice { index, device });
                    self.frames_read = 0;
                    return CameraStatus::Ready { index };
                }
                Err(reason) => {
                    log::warn!("camera: index {} unusable: {}", index, reason);
                    attempts.push(OpenAttempt {
                        index,
                        outcome: OpenOutcome::Failed(reason),
                    });
                }
            }
        }

        log::error!(
            "DeviceUnavailable: no camera opened after {} attempt(s)",
            attempts.len()
        );
        CameraStatus::Unavailable { attempts }
    }

    // A device that fails here is dropped before returning, which releases it.
    fn try_candidate(&mut self, index: i32) -> Result<Box<dyn CaptureDevice>, String> {
        let mut device = self.provider.open(index).map_err(|e| format!("{e:#}"))?;

        if let Err(err) = device.configure(&self.settings.format) {
            log::warn!(
                "camera: {} rejected {}x{}@{}fps: {:#}",
                device.label(),
                self.settings.format.width,
                self.settings.format.height,
                self.settings.format.fps,
                err
            );
        }

        for n in 0..self.settings.warmup_frames {
            device
                .read_frame()
                .map_err(|e| format!("warm-up read {} failed: {e:#}", n + 1))?;
        }
        Ok(device)
    }

    pub fn is_ready(&self) -> bool {
        self.active.is_some()
    }

    /// Index of the device currently held.
    pub fn active_index(&self) -> Option<i32> {
        self.active.as_ref().map(|active| active.index)
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Next frame, or `None` when the source is not open or the device failed.
    /// A failed read releases the device.
    pub fn read(&mut self) -> Option<Frame> {
        let active = self.active.as_mut()?;
        match active.device.read_frame() {
            Ok(frame) => {
                self.frames_read += 1;
                Some(frame)
            }
            Err(err) => {
                log::warn!("FrameReadFailure: {}: {:#}", active.device.label(), err);
                self.close();
                None
            }
        }
    }

    /// Release the device. Safe to call repeatedly or before `open`.
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            let label = active.device.label();
            drop(active);
            log::info!("camera: released {}", label);
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SyntheticProvider;

    fn settings(preferred: i32, fallbacks: &[i32]) -> SourceSettings {
        SourceSettings {
            preferred_index: preferred,
            fallback_indices: fallbacks.to_vec(),
            format: CaptureFormat {
                width: 32,
                height: 24,
                fps: 30,
            },
            warmup_frames: 2,
        }
    }

    #[test]
    fn candidates_are_deduplicated_in_order() {
        let s = settings(1, &[1, 2, -1, 2]);
        assert_eq!(s.candidate_indices(), vec![1, 2, -1]);
    }

    #[test]
    fn falls_back_to_later_index() {
        let provider = SyntheticProvider::new(vec![2]);
        let mut source = FrameSource::new(Box::new(provider), settings(0, &[1, 2]));
        let status = source.open();
        assert_eq!(status, CameraStatus::Ready { index: 2 });
        assert_eq!(source.active_index(), Some(2));
        assert!(source.read().is_some());
    }

    #[test]
    fn warmup_failure_moves_on_to_next_candidate() {
        // Index 0 opens but dies on its second warm-up read.
        let provider = SyntheticProvider::new(vec![0, 1]).with_frame_limit_at(0, 1);
        let mut source = FrameSource::new(Box::new(provider), settings(0, &[1]));
        assert_eq!(source.open(), CameraStatus::Ready { index: 1 });
        assert_eq!(source.active_index(), Some(1));
        assert_eq!(source.frames_read(), 0);
        assert!(source.read().is_some());
        assert!(source.read().is_some());
        assert_eq!(source.frames_read(), 2);
    }

    #[test]
    fn warmup_failure_on_every_candidate_is_unavailable() {
        let provider = SyntheticProvider::new(vec![0, 1]).with_frame_limit(1);
        let mut source = FrameSource::new(Box::new(provider), settings(0, &[1]));
        match source.open() {
            CameraStatus::Unavailable { attempts } => {
                assert_eq!(attempts.len(), 2);
                for attempt in &attempts {
                    match &attempt.outcome {
                        OpenOutcome::Failed(reason) => assert!(reason.contains("warm-up")),
                        other => panic!("unexpected outcome {other:?}"),
                    }
                }
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
    }

    #[test]
    fn reports_every_failed_attempt() {
        let provider = SyntheticProvider::new(vec![]);
        let mut source = FrameSource::new(Box::new(provider), settings(0, &[1, 2]));
        match source.open() {
            CameraStatus::Unavailable { attempts } => {
                let indices: Vec<i32> = attempts.iter().map(|a| a.index).collect();
                assert_eq!(indices, vec![0, 1, 2]);
                assert!(attempts
                    .iter()
                    .all(|a| matches!(a.outcome, OpenOutcome::Failed(_))));
            }
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert!(!source.is_ready());
        assert!(source.read().is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let mut never_opened =
            FrameSource::new(Box::new(SyntheticProvider::new(vec![0])), settings(0, &[]));
        never_opened.close();
        never_opened.close();

        let mut source =
            FrameSource::new(Box::new(SyntheticProvider::new(vec![0])), settings(0, &[]));
        assert!(source.open().is_ready());
        source.close();
        source.close();
        assert!(!source.is_ready());
    }

    #[test]
    fn read_failure_releases_device() {
        let provider = SyntheticProvider::new(vec![0]).with_frame_limit(3);
        let mut source = FrameSource::new(Box::new(provider), settings(0, &[]));
        assert!(source.open().is_ready());
        // two frames were consumed by warm-up
        assert!(source.read().is_some());
        assert!(source.read().is_none());
        assert!(!source.is_ready());
    }
}
