//! HTTP surface of the attendance daemon.
//!
//! Routes:
//! - `GET /` status page embedding the live feed
//! - `GET /video_feed` multipart JPEG stream
//! - `GET /api/stats` today's attendance figures
//! - `GET /health` readiness of camera and database
//! - `POST /api/recognition` feed one recognition candidate to the tracker
//!
//! Connections from non-loopback peers are refused while bound to loopback.

mod http;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::attendance::{RecognitionCandidate, VerificationTracker};
use crate::state::SystemState;
use crate::storage::{daily_stats, AttendanceStore, SubjectId};
use crate::stream::{StreamHub, CONTENT_TYPE as STREAM_CONTENT_TYPE};

use http::{respond, respond_json, start_stream, HttpRequest};

const STREAM_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_IDLE: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

/// Everything a request handler can reach.
#[derive(Clone)]
pub struct ApiContext {
    pub hub: StreamHub,
    pub tracker: Arc<VerificationTracker<dyn AttendanceStore>>,
    pub state: Arc<SystemState>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    stop_flag: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Open video feeds end when the hub shuts down.
    pub fn stop(mut self) -> Result<()> {
        self.stop_flag.store(true, Ordering::SeqCst);
        match self.acceptor.take() {
            Some(acceptor) => acceptor
                .join()
                .map_err(|_| anyhow!("api acceptor thread panicked")),
            None => Ok(()),
        }
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    ctx: ApiContext,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, ctx: ApiContext) -> Self {
        Self { cfg, ctx }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let bind_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api addr '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let acceptor = {
            let stop_flag = Arc::clone(&stop_flag);
            let ctx = self.ctx;
            std::thread::Builder::new()
                .name("api-accept".to_string())
                .spawn(move || {
                    if let Err(err) = accept_loop(&listener, &ctx, &stop_flag) {
                        log::error!("attendance api stopped: {:#}", err);
                    }
                })?
        };
        log::info!("attendance api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            stop_flag,
            acceptor: Some(acceptor),
        })
    }
}

fn accept_loop(listener: &TcpListener, ctx: &ApiContext, stop_flag: &AtomicBool) -> Result<()> {
    while !stop_flag.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_IDLE);
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            if let Err(err) = serve(stream, &ctx) {
                log::warn!("attendance api request failed: {:#}", err);
            }
        });
    }
    Ok(())
}

fn serve(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let (peer, local) = (stream.peer_addr()?, stream.local_addr()?);
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return respond_json(&mut stream, 403, r#"{"error":"forbidden"}"#);
    }

    let request = HttpRequest::read_from(&mut stream)?;
    let expected_method = match request.path.as_str() {
        "/" | "/video_feed" | "/api/stats" | "/health" => "GET",
        "/api/recognition" => "POST",
        _ => return respond_json(&mut stream, 404, r#"{"error":"not_found"}"#),
    };
    if request.method != expected_method {
        return respond_json(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }

    match request.path.as_str() {
        "/" => respond(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            index_page(ctx).as_bytes(),
        ),
        "/video_feed" => stream_video(stream, ctx),
        "/api/stats" => {
            let stats = daily_stats(ctx.tracker.store().as_ref(), today());
            respond(&mut stream, 200, "application/json", &serde_json::to_vec(&stats)?)
        }
        "/health" => {
            let body = serde_json::json!({
                "status": ctx.state.health_label(),
                "camera": ctx.state.is_camera_ready(),
                "database": ctx.tracker.store().count_active_subjects().is_ok(),
            });
            respond(&mut stream, 200, "application/json", body.to_string().as_bytes())
        }
        _ => recognize(&mut stream, ctx, &request.body),
    }
}

#[derive(Debug, Deserialize)]
struct RecognitionRequest {
    subject_id: Option<SubjectId>,
    confidence: f64,
}

fn recognize(stream: &mut TcpStream, ctx: &ApiContext, body: &[u8]) -> Result<()> {
    let request: RecognitionRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(err) => {
            log::warn!("recognition request rejected: {}", err);
            return respond_json(stream, 400, r#"{"error":"invalid_request"}"#);
        }
    };
    let candidate = RecognitionCandidate::new(request.subject_id, request.confidence);
    let result = ctx.tracker.process(&candidate);
    respond(stream, 200, "application/json", &serde_json::to_vec(&result)?)
}

fn stream_video(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    let subscription = match ctx.hub.subscribe() {
        Ok(subscription) => subscription,
        Err(err) => {
            log::warn!("video feed unavailable: {:#}", err);
            return respond_json(&mut stream, 503, r#"{"error":"stream_unavailable"}"#);
        }
    };
    stream.set_write_timeout(Some(STREAM_WRITE_TIMEOUT))?;
    start_stream(&mut stream, STREAM_CONTENT_TYPE)?;
    for chunk in subscription {
        if let Err(err) = stream.write_all(&chunk) {
            log::debug!("video viewer disconnected: {}", err);
            break;
        }
    }
    Ok(())
}

fn index_page(ctx: &ApiContext) -> String {
    let stats = daily_stats(ctx.tracker.store().as_ref(), today());
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Face Attendance</title></head>
<body>
<h1>Face Attendance</h1>
<img src="/video_feed" alt="live camera">
<p>Present today: {} of {} ({:.1}%)</p>
<p>System: {}</p>
</body>
</html>
"#,
        stats.today_count,
        stats.total_students,
        stats.attendance_rate,
        ctx.state.health_label()
    )
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}
