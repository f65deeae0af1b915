//! Loopback control and query API.
//!
//! Routes:
//! - `GET /health`
//! - `GET /state`, `POST /pause`, `POST /resume`
//! - `GET /events?limit=N` (newest first, default 20)
//! - `GET /screenshots?limit=N` (newest first, default 10)
//! - `GET /screenshots/{name}` (JPEG body)
//! - `GET /cameras` (per-worker status)

use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::control::{DetectionGate, DetectionState};
use crate::sink::{CsvEventLog, EventLogStore, ScreenshotStore};
use crate::worker::WorkerStatus;

const MAX_REQUEST_BYTES: usize = 8192;
const DEFAULT_EVENT_LIMIT: usize = 20;
const DEFAULT_SCREENSHOT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 1000;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub log_path: PathBuf,
    pub screenshot_dir: PathBuf,
}

/// Shared pipeline state the API reads and controls.
#[derive(Clone)]
pub struct ApiState {
    pub gate: DetectionGate,
    pub workers: Vec<Arc<WorkerStatus>>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
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
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.cfg.addr, e))?;
        if !configured_addr.ip().is_loopback() {
            return Err(anyhow!(
                "api address '{}' is not a loopback address",
                configured_addr
            ));
        }
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let state = self.state;
        let join = std::thread::Builder::new()
            .name("control-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, &cfg, &state, shutdown_thread) {
                    log::error!("control api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    state: &ApiState,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cfg, state) {
                    log::warn!("control api request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, state: &ApiState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    if !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    let (status, body) = route(&request, cfg, state);
    match body {
        Body::Json(value) => write_json_response(&mut stream, status, &value),
        Body::Jpeg(bytes) => write_response(&mut stream, status, "image/jpeg", &bytes),
    }
}

enum Body {
    Json(serde_json::Value),
    Jpeg(Vec<u8>),
}

fn error(status: u16, message: &str) -> (u16, Body) {
    (status, Body::Json(json!({ "error": message })))
}

fn internal(err: anyhow::Error) -> (u16, Body) {
    log::error!("control api: {:#}", err);
    error(500, "internal_error")
}

fn route(request: &HttpRequest, cfg: &ApiConfig, state: &ApiState) -> (u16, Body) {
    let method = request.method.as_str();
    let path = request.path.as_str();

    if let Some(name) = path.strip_prefix("/screenshots/") {
        if method != "GET" {
            return error(405, "method_not_allowed");
        }
        return screenshot(cfg, name);
    }

    match (method, path) {
        ("GET", "/health") => (
            200,
            Body::Json(json!({"status": "ok", "workers": state.workers.len()})),
        ),
        ("GET", "/state") => (
            200,
            Body::Json(json!({"status": state.gate.state().as_str()})),
        ),
        ("POST", "/pause") => set_state(state, DetectionState::Paused),
        ("POST", "/resume") => set_state(state, DetectionState::Active),
        ("GET", "/events") => {
            let limit = match request.limit(DEFAULT_EVENT_LIMIT) {
                Ok(limit) => limit,
                Err(_) => return error(400, "invalid_limit"),
            };
            match recent_events(cfg, limit) {
                Ok(value) => (200, Body::Json(value)),
                Err(err) => internal(err),
            }
        }
        ("GET", "/screenshots") => {
            let limit = match request.limit(DEFAULT_SCREENSHOT_LIMIT) {
                Ok(limit) => limit,
                Err(_) => return error(400, "invalid_limit"),
            };
            match ScreenshotStore::open(&cfg.screenshot_dir).and_then(|store| store.latest(limit)) {
                Ok(names) => (200, Body::Json(json!(names))),
                Err(err) => internal(err),
            }
        }
        ("GET", "/cameras") => {
            let snapshots: Vec<_> = state.workers.iter().map(|w| w.snapshot()).collect();
            (200, Body::Json(json!(snapshots)))
        }
        (_, "/health" | "/state" | "/pause" | "/resume" | "/events" | "/screenshots" | "/cameras") => {
            error(405, "method_not_allowed")
        }
        _ => error(404, "not_found"),
    }
}

fn set_state(state: &ApiState, target: DetectionState) -> (u16, Body) {
    match state.gate.set_state(target) {
        Ok(()) => (200, Body::Json(json!({"status": target.as_str()}))),
        Err(err) => internal(err),
    }
}

fn recent_events(cfg: &ApiConfig, limit: usize) -> Result<serde_json::Value> {
    if !cfg.log_path.exists() {
        return Ok(json!([]));
    }
    let mut log = CsvEventLog::open_existing(&cfg.log_path)?;
    Ok(serde_json::to_value(log.recent(limit)?)?)
}

fn screenshot(cfg: &ApiConfig, name: &str) -> (u16, Body) {
    let store = match ScreenshotStore::open(&cfg.screenshot_dir) {
        Ok(store) => store,
        Err(err) => return internal(err),
    };
    let path = match store.path_of(name) {
        Ok(path) => path,
        Err(_) => return error(400, "invalid_name"),
    };
    match std::fs::read(&path) {
        Ok(bytes) => (200, Body::Jpeg(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => error(404, "not_found"),
        Err(err) => internal(err.into()),
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_target = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let (path, query) = parse_target(raw_target)?;
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        query,
    })
}

/// Splits a request target into a percent-decoded path and query map.
fn parse_target(raw: &str) -> Result<(String, HashMap<String, String>)> {
    let (raw_path, raw_query) = raw.split_once('?').unwrap_or((raw, ""));
    let path = urlencoding::decode(raw_path)
        .map_err(|e| anyhow!("invalid path encoding: {}", e))?
        .into_owned();
    let mut query = HashMap::new();
    for pair in raw_query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key).map_err(|e| anyhow!("invalid query encoding: {}", e))?;
        let value =
            urlencoding::decode(value).map_err(|e| anyhow!("invalid query encoding: {}", e))?;
        query.insert(key.into_owned(), value.into_owned());
    }
    Ok((path, query))
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
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
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
}

impl HttpRequest {
    fn limit(&self, default: usize) -> Result<usize> {
        match self.query.get("limit") {
            None => Ok(default),
            Some(raw) => {
                let limit: usize = raw
                    .parse()
                    .map_err(|_| anyhow!("limit must be a positive integer"))?;
                if limit == 0 {
                    return Err(anyhow!("limit must be a positive integer"));
                }
                Ok(limit.min(MAX_LIMIT))
            }
        }
    }
}
