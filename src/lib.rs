//! Attendance Kernel
//!
//! Live face-attendance pipeline: a camera is discovered and owned by a
//! `FrameSource`, every frame runs through a Haar-cascade face detector, gets
//! annotated and JPEG-encoded, and is broadcast as a motion-JPEG stream.
//! Recognition candidates produced by an external identity matcher feed a
//! `VerificationTracker`, which records attendance at most once per subject
//! per day after repeated confident sightings.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames
//! - `ingest`: capture devices and camera discovery
//! - `detect`: face detection (pure-Rust Haar cascade, optional OpenCV backend)
//! - `annotate`: overlays drawn onto frame copies
//! - `encode`: JPEG encoding
//! - `stream`: chunk iterator and broadcast hub
//! - `attendance`: debounced verification
//! - `storage`: attendance persistence (SQLite, in-memory)
//! - `state`: system readiness
//! - `config`, `api`: daemon configuration and HTTP surface

use rand::RngCore;

pub mod annotate;
pub mod api;
pub mod attendance;
pub mod config;
pub mod detect;
pub mod encode;
pub mod frame;
pub mod ingest;
pub mod state;
pub mod storage;
pub mod stream;

pub use attendance::{
    AttendanceStatus, RecognitionCandidate, RecognitionResult, TrackerSettings,
    VerificationTracker,
};
pub use detect::{
    detect_faces, load_detector, DetectionParams, DetectorKind, FaceBox, FaceDetector,
    HaarCascadeDetector,
};
pub use encode::JpegEncoder;
pub use frame::Frame;
pub use ingest::{CameraStatus, FrameSource, SourceSettings};
pub use state::{Readiness, SystemState};
pub use storage::{
    daily_stats, AttendanceRecord, AttendanceStore, DailyStats, InMemoryAttendanceStore,
    InsertOutcome, SqliteAttendanceStore, SubjectId,
};
pub use stream::{FramePipeline, FrameStream, StreamHub, Subscription};

/// Identifier for one process run, stamped on every record it writes.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("session-{}", hex::encode(bytes))
}
