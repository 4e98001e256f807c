use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::attendance::TrackerSettings;
use crate::detect::{DetectionParams, DetectorKind};
use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::ingest::{CameraBackend, CaptureFormat, SourceSettings};

const DEFAULT_DB_PATH: &str = "attendance.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_CASCADE_PATH: &str =
    "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml";

#[derive(Debug, Deserialize, Default)]
struct AttendanceConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    verification: Option<VerificationConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    backend: Option<String>,
    index: Option<i32>,
    fallback_indices: Option<Vec<i32>>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    warmup_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    cascade_path: Option<PathBuf>,
    scale_factor: Option<f32>,
    min_neighbors: Option<u32>,
    min_size: Option<[u32; 2]>,
}

#[derive(Debug, Deserialize, Default)]
struct VerificationConfigFile {
    confidence_threshold: Option<f64>,
    required_attempts: Option<u32>,
    attempt_window_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct AttendanceConfig {
    pub db_path: String,
    pub api_addr: String,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub verification: TrackerSettings,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub backend: CameraBackend,
    pub index: i32,
    pub fallback_indices: Vec<i32>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub warmup_frames: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    pub cascade_path: PathBuf,
    pub params: DetectionParams,
}

impl CameraSettings {
    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            preferred_index: self.index,
            fallback_indices: self.fallback_indices.clone(),
            format: CaptureFormat {
                width: self.width,
                height: self.height,
                fps: self.fps,
            },
            warmup_frames: self.warmup_frames,
        }
    }
}

impl AttendanceConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ATTENDANCE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AttendanceConfigFile) -> Result<Self> {
        let source_defaults = SourceSettings::default();
        let detect_defaults = DetectionParams::default();
        let tracker_defaults = TrackerSettings::default();

        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            backend: match camera_file.backend.as_deref() {
                Some(name) => name.parse()?,
                None => CameraBackend::default(),
            },
            index: camera_file.index.unwrap_or(source_defaults.preferred_index),
            fallback_indices: camera_file
                .fallback_indices
                .unwrap_or(source_defaults.fallback_indices),
            width: camera_file.width.unwrap_or(source_defaults.format.width),
            height: camera_file.height.unwrap_or(source_defaults.format.height),
            fps: camera_file.fps.unwrap_or(source_defaults.format.fps),
            warmup_frames: camera_file
                .warmup_frames
                .unwrap_or(source_defaults.warmup_frames),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            kind: match detector_file.backend.as_deref() {
                Some(name) => name.parse()?,
                None => DetectorKind::default(),
            },
            cascade_path: detector_file
                .cascade_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CASCADE_PATH)),
            params: DetectionParams {
                scale_factor: detector_file
                    .scale_factor
                    .unwrap_or(detect_defaults.scale_factor),
                min_neighbors: detector_file
                    .min_neighbors
                    .unwrap_or(detect_defaults.min_neighbors),
                min_size: detector_file
                    .min_size
                    .map(|[w, h]| (w, h))
                    .unwrap_or(detect_defaults.min_size),
            },
        };

        let verification_file = file.verification.unwrap_or_default();
        let verification = TrackerSettings {
            confidence_threshold: verification_file
                .confidence_threshold
                .unwrap_or(tracker_defaults.confidence_threshold),
            required_attempts: verification_file
                .required_attempts
                .unwrap_or(tracker_defaults.required_attempts),
            attempt_window: verification_file
                .attempt_window_secs
                .map(Duration::from_secs)
                .unwrap_or(tracker_defaults.attempt_window),
        };

        Ok(Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            camera,
            detector,
            verification,
            jpeg_quality: file
                .stream
                .and_then(|stream| stream.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_value("ATTENDANCE_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = env_value("ATTENDANCE_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(path) = env_value("ATTENDANCE_CASCADE_PATH") {
            self.detector.cascade_path = PathBuf::from(path);
        }
        if let Some(kind) = env_value("ATTENDANCE_DETECTOR") {
            self.detector.kind = kind.parse()?;
        }
        if let Some(backend) = env_value("CAMERA_BACKEND") {
            self.camera.backend = backend.parse()?;
        }
        if let Some(index) = env_value("CAMERA_INDEX") {
            self.camera.index = parse_env("CAMERA_INDEX", &index)?;
        }
        if let Some(width) = env_value("CAMERA_WIDTH") {
            self.camera.width = parse_env("CAMERA_WIDTH", &width)?;
        }
        if let Some(height) = env_value("CAMERA_HEIGHT") {
            self.camera.height = parse_env("CAMERA_HEIGHT", &height)?;
        }
        if let Some(fps) = env_value("CAMERA_FPS") {
            self.camera.fps = parse_env("CAMERA_FPS", &fps)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if self.detector.params.scale_factor <= 1.0 {
            return Err(anyhow!("detector scale_factor must be greater than 1.0"));
        }
        let (min_w, min_h) = self.detector.params.min_size;
        if min_w == 0 || min_h == 0 {
            return Err(anyhow!("detector min_size must be greater than zero"));
        }
        let threshold = self.verification.confidence_threshold;
        if threshold.is_nan() || threshold < 0.0 {
            return Err(anyhow!("confidence_threshold must be zero or positive"));
        }
        if self.verification.required_attempts == 0 {
            return Err(anyhow!("required_attempts must be at least 1"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} has invalid value '{}'", key, value))
}

fn read_config_file(path: &Path) -> Result<AttendanceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
