//! HTTP API for calibration and measurement.
//!
//! Wire contract:
//! - `POST /api/calibrate` multipart: `file`, `known_distance?`, `known_width?`, `session_id?`
//!   -> `{success, focal_length?}`
//! - `POST /api/measure` multipart: `file`, `focal_length?`, `session_id?`
//!   -> `{success, distance?}`
//! - `POST /api/reset`, `GET /api/session`, `GET /health`
//!
//! Recoverable failures answer 200 with `success: false` and an `error` code;
//! only transport and server failures use non-2xx statuses.

pub mod multipart;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::EstimationError;
use crate::estimate::MeasurementResult;
use crate::frame::ImageFrame;
use crate::profile::CalibrationProfile;
use crate::service::{optional_positive, DistanceService, MeasurementRequest};
use crate::session::SessionId;

use self::multipart::Form;

const MAX_HEADER_BYTES: usize = 8192;
pub const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_MAX_BODY_BYTES: usize = 12 * 1024 * 1024;
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;
const SESSION_HEADER: &str = "x-session-id";
const REJECT_DRAIN_BYTES: usize = 16 * 1024 * 1024;
const REJECT_DRAIN_TIME: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_body_bytes: usize,
    pub max_connections: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_API_ADDR.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Requests already being served finish on
    /// their own threads.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    service: Arc<DistanceService>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, service: Arc<DistanceService>) -> Self {
        Self { cfg, service }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let service = self.service.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, service, shutdown_thread) {
                log::error!("distance api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

/// Decrements the in-flight counter when a handler thread finishes.
struct InflightGuard(Arc<AtomicUsize>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    service: Arc<DistanceService>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let inflight = Arc::new(AtomicUsize::new(0));
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((mut stream, peer)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    log::warn!("distance api could not configure connection from {}: {}", peer, err);
                    continue;
                }
                if inflight.fetch_add(1, Ordering::SeqCst) >= cfg.max_connections {
                    inflight.fetch_sub(1, Ordering::SeqCst);
                    log::warn!("distance api busy; rejecting connection from {}", peer);
                    let budget = cfg.max_body_bytes.saturating_add(MAX_HEADER_BYTES);
                    std::thread::spawn(move || {
                        let body = failure_body(None, "busy", "too many concurrent requests");
                        if write_json_response(&mut stream, 503, &body).is_ok() {
                            close_unread(stream, budget);
                        }
                    });
                    continue;
                }
                let guard = InflightGuard(inflight.clone());
                let cfg = cfg.clone();
                let service = service.clone();
                std::thread::spawn(move || {
                    let _guard = guard;
                    if let Err(err) = handle_connection(stream, &cfg, &service) {
                        log::warn!("distance api request from {} rejected: {}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(20));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Debug, Default, Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    focal_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    calibrated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<CalibrationProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn failure_body(session: Option<&SessionId>, code: &'static str, message: &str) -> ApiResponse {
    ApiResponse {
        success: false,
        session_id: session.map(|s| s.to_string()),
        error: Some(code),
        message: Some(message.to_string()),
        ..ApiResponse::default()
    }
}

/// Status and body for a failed calibrate/measure call.
fn error_response(session: &SessionId, err: &EstimationError) -> (u16, ApiResponse) {
    let status = match err {
        _ if err.is_recoverable() => 200,
        EstimationError::Transport(_) => 502,
        _ => 500,
    };
    (status, failure_body(Some(session), err.code(), &err.to_string()))
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    service: &DistanceService,
) -> Result<()> {
    let request = match read_request(&mut stream, cfg.max_body_bytes) {
        Ok(request) => request,
        Err(RequestError::TooLarge { unread }) => {
            let body = failure_body(None, "payload_too_large", "request body too large");
            write_json_response(&mut stream, 413, &body)?;
            close_unread(stream, unread);
            return Err(anyhow!("request body too large"));
        }
        Err(RequestError::Malformed(err)) => {
            let body = failure_body(None, "bad_request", &err.to_string());
            write_json_response(&mut stream, 400, &body)?;
            return Err(err);
        }
    };

    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, "text/plain", b"");
    }

    let route_method = match request.path.as_str() {
        "/health" | "/api/session" => "GET",
        "/api/calibrate" | "/api/measure" | "/api/reset" => "POST",
        _ => {
            let body = failure_body(None, "not_found", "unknown path");
            return write_json_response(&mut stream, 404, &body);
        }
    };
    if request.method != route_method {
        let body = failure_body(None, "method_not_allowed", "method not allowed");
        return write_json_response(&mut stream, 405, &body);
    }
    if request.path == "/health" {
        return write_response(&mut stream, 200, "application/json", br#"{"status":"ok"}"#);
    }

    let form = match request.form() {
        Ok(form) => form,
        Err(err) => {
            let body = failure_body(None, "bad_request", &format!("{err:#}"));
            write_json_response(&mut stream, 400, &body)?;
            return Err(err);
        }
    };
    let session = match request.session_id(&form) {
        Ok(session) => session,
        Err(err) => {
            let err = EstimationError::invalid(format!("{err:#}"));
            let body = failure_body(None, err.code(), &err.to_string());
            return write_json_response(&mut stream, 200, &body);
        }
    };

    let (status, body) = match request.path.as_str() {
        "/api/calibrate" => calibrate(service, &session, &form),
        "/api/measure" => measure(service, &session, &form),
        "/api/reset" => match service.reset(&session) {
            Ok(_) => (
                200,
                ApiResponse {
                    success: true,
                    session_id: Some(session.to_string()),
                    calibrated: Some(false),
                    ..ApiResponse::default()
                },
            ),
            Err(err) => error_response(&session, &err),
        },
        _ => match service.state(&session) {
            Ok(state) => (
                200,
                ApiResponse {
                    success: true,
                    session_id: Some(session.to_string()),
                    calibrated: Some(state.is_calibrated()),
                    profile: state.profile().cloned(),
                    ..ApiResponse::default()
                },
            ),
            Err(err) => error_response(&session, &err),
        },
    };
    if !body.success {
        log::warn!(
            "{} for session {} failed: {}",
            request.path,
            session,
            body.message.as_deref().unwrap_or("unknown error")
        );
    }
    write_json_response(&mut stream, status, &body)
}

fn run_calibrate(
    service: &DistanceService,
    session: &SessionId,
    form: &Form,
) -> Result<CalibrationProfile, EstimationError> {
    let image = image_field(form)?;
    let known_distance =
        optional_positive("known_distance", number_field(form, "known_distance")?)?;
    let known_width = optional_positive("known_width", number_field(form, "known_width")?)?;
    service.calibrate(session, image, known_distance, known_width)
}

fn calibrate(service: &DistanceService, session: &SessionId, form: &Form) -> (u16, ApiResponse) {
    match run_calibrate(service, session, form) {
        Ok(profile) => (
            200,
            ApiResponse {
                success: true,
                session_id: Some(session.to_string()),
                focal_length: Some(profile.focal_length_px),
                ..ApiResponse::default()
            },
        ),
        Err(err) => error_response(session, &err),
    }
}

fn run_measure(
    service: &DistanceService,
    session: &SessionId,
    form: &Form,
) -> Result<MeasurementResult, EstimationError> {
    let request = MeasurementRequest {
        image: image_field(form)?,
        focal_length_px: number_field(form, "focal_length")?,
    };
    service.measure(session, request)
}

fn measure(service: &DistanceService, session: &SessionId, form: &Form) -> (u16, ApiResponse) {
    match run_measure(service, session, form) {
        Ok(result) => (
            200,
            ApiResponse {
                success: true,
                session_id: Some(session.to_string()),
                distance: Some(result.distance_cm),
                ..ApiResponse::default()
            },
        ),
        Err(err) => error_response(session, &err),
    }
}

fn image_field(form: &Form) -> Result<Arc<ImageFrame>, EstimationError> {
    let part = form
        .part("file")
        .ok_or_else(|| EstimationError::invalid("missing form field 'file'"))?;
    let frame = ImageFrame::decode(&part.data)
        .map_err(|err| EstimationError::invalid(format!("unreadable image: {err:#}")))?;
    Ok(Arc::new(frame))
}

fn number_field(form: &Form, name: &str) -> Result<Option<f64>, EstimationError> {
    let text = form
        .text(name)
        .map_err(|err| EstimationError::invalid(format!("{err:#}")))?;
    match text {
        None | Some("") | Some("undefined") | Some("null") => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| EstimationError::invalid(format!("{name} must be a number, got '{raw}'"))),
    }
}

/// Close a connection whose request was not read in full. The write side is
/// shut first and pending input drained, up to `budget` bytes, so the reply
/// already sent is not discarded by a reset.
fn close_unread(mut stream: TcpStream, budget: usize) {
    if stream.shutdown(Shutdown::Write).is_err() {
        return;
    }
    let deadline = Instant::now() + REJECT_DRAIN_TIME;
    let mut left = budget.min(REJECT_DRAIN_BYTES);
    let mut buf = [0u8; 4096];
    while left > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || stream.set_read_timeout(Some(remaining)).is_err() {
            break;
        }
        let cap = left.min(buf.len());
        match stream.read(&mut buf[..cap]) {
            Ok(0) | Err(_) => break,
            Ok(n) => left -= n,
        }
    }
}

enum RequestError {
    TooLarge { unread: usize },
    Malformed(anyhow::Error),
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        Self::Malformed(err.into())
    }
}

fn read_request(stream: &mut TcpStream, max_body_bytes: usize) -> Result<HttpRequest, RequestError> {
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed(anyhow!("request headers too large")));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed(anyhow!("connection closed mid-request")));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed(anyhow!("empty request")))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed(anyhow!("missing method")))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed(anyhow!("missing path")))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed(anyhow!("invalid content-length")))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        let buffered = data.len() - (header_end + 4);
        return Err(RequestError::TooLarge {
            unread: content_length.saturating_sub(buffered),
        });
    }
    let mut body = data[header_end + 4..].to_vec();
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        stream.read_exact(&mut body[already..])?;
    }
    body.truncate(content_length);

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query(query)),
        None => (raw_path.to_string(), HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        query,
        headers,
        body,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn write_json_response<T: Serialize>(stream: &mut TcpStream, status: u16, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        502 => "HTTP/1.1 502 Bad Gateway",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type, Authorization, X-Session-Id\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl HttpRequest {
    /// Form fields of the body. An empty body is an empty form.
    fn form(&self) -> Result<Form> {
        if self.body.is_empty() {
            return Ok(Form::default());
        }
        let content_type = self
            .headers
            .get("content-type")
            .ok_or_else(|| anyhow!("request body without content-type"))?;
        Form::parse(content_type, &self.body)
    }

    /// Header first, then form field, then query parameter, then the shared default.
    fn session_id(&self, form: &Form) -> Result<SessionId> {
        if let Some(value) = self.headers.get(SESSION_HEADER) {
            return SessionId::parse(value);
        }
        if let Some(value) = form.text("session_id")? {
            return SessionId::parse(value);
        }
        if let Some(value) = self.query.get("session_id") {
            return SessionId::parse(value);
        }
        Ok(SessionId::default())
    }
}
