//! attendanced - face attendance daemon
//!
//! This daemon:
//! 1. Opens the attendance database
//! 2. Loads the face detector (runs without detections if the cascade is missing)
//! 3. Discovers a camera, falling back to degraded mode when none opens
//! 4. Serves the live stream, stats, health and recognition API
//! 5. Releases the camera and stops the API on Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};

use attendance_kernel::{
    api::{ApiConfig, ApiContext, ApiServer},
    config::AttendanceConfig,
    load_detector, new_session_id, AttendanceStore, CameraStatus, FaceDetector, FramePipeline,
    FrameSource, JpegEncoder, SqliteAttendanceStore, StreamHub, SystemState, VerificationTracker,
};

const MODULE: &str = "attendanced";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AttendanceConfig::load()?;
    let store: Arc<dyn AttendanceStore> = Arc::new(SqliteAttendanceStore::open(&config.db_path)?);
    let session_id = new_session_id();
    log::info!(
        "attendanced {} starting, session {}",
        env!("CARGO_PKG_VERSION"),
        session_id
    );
    record_event(store.as_ref(), "INFO", &format!("system started ({})", session_id));

    let detector = load_detector(
        config.detector.kind,
        &config.detector.cascade_path,
        config.detector.params,
    );
    if !detector.is_ready() {
        record_event(store.as_ref(), "ERROR", "face detector not loaded");
    }

    let state = Arc::new(SystemState::new());
    let provider = config.camera.backend.provider()?;
    let source = FrameSource::new(provider, config.camera.source_settings());
    let pipeline = FramePipeline::new(detector, JpegEncoder::new(config.jpeg_quality)?)
        .with_max_fps(config.camera.fps);
    let hub = StreamHub::new(source, pipeline, Arc::clone(&state));

    match hub.open_source() {
        CameraStatus::Ready { index } => {
            record_event(
                store.as_ref(),
                "INFO",
                &format!("camera ready at index {} ({})", index, config.camera.backend.as_str()),
            );
        }
        CameraStatus::Unavailable { attempts } => {
            log::warn!("running in degraded mode after {} camera attempt(s)", attempts.len());
            record_event(store.as_ref(), "WARNING", "camera unavailable, running degraded");
        }
    }

    let tracker = Arc::new(VerificationTracker::new(
        Arc::clone(&store),
        config.verification,
        session_id,
    ));
    let api_handle = ApiServer::new(
        ApiConfig {
            addr: config.api_addr.clone(),
        },
        ApiContext {
            hub: hub.clone(),
            tracker,
            state: Arc::clone(&state),
        },
    )
    .spawn()?;
    log::info!("live stream at http://{}/video_feed", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("attendanced waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, releasing camera and stopping API...");
    hub.shutdown()?;
    api_handle.stop()?;
    record_event(store.as_ref(), "INFO", "system stopped");

    Ok(())
}

fn record_event(store: &dyn AttendanceStore, level: &str, message: &str) {
    if let Err(err) = store.log_system_event(level, message, Some(MODULE)) {
        log::error!("failed to persist system event: {:#}", err);
    }
}
