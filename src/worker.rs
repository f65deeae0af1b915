//! Per-camera control loop.
//!
//! One `CameraWorker` per camera, each on its own thread. A worker never exits
//! on its own: stream failures move it to `Reconnecting`, detector and sink
//! failures are counted and skipped. Only the global shutdown signal ends it.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::CameraConfig;
use crate::control::DetectionGate;
use crate::cooldown::{CooldownTracker, DEFAULT_COOLDOWN};
use crate::detect::{DetectionFilter, DetectorBackend};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::shutdown::Shutdown;
use crate::sink::EventSink;
use crate::{image_file_name, sanitize_field, DetectionEvent};

/// Loop timing shared by every worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Wait after each processed frame.
    pub detection_interval: Duration,
    /// Wait between gate checks while paused.
    pub pause_poll_interval: Duration,
    /// Wait after a failed connect or read before connecting again.
    pub reconnect_backoff: Duration,
    pub cooldown_window: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_secs(2),
            pause_poll_interval: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(5),
            cooldown_window: DEFAULT_COOLDOWN,
        }
    }
}

/// Connection state of a worker's stream.
///
/// `Connecting` -> `Streaming` on a successful open; an open failure or a read
/// failure while streaming -> `Reconnecting`; `Reconnecting` -> `Streaming` once
/// the stream opens again. `Paused` releases the stream; resuming starts over
/// at `Connecting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Connecting,
    Streaming,
    Reconnecting,
    Paused,
    Stopped,
}

/// Recoverable failures a worker reports as diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StreamUnavailable,
    InferenceFailed,
    SinkFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::StreamUnavailable => "stream_unavailable",
            FailureKind::InferenceFailed => "inference_failed",
            FailureKind::SinkFailed => "sink_failed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live counters for one worker, readable from any thread.
#[derive(Debug)]
pub struct WorkerStatus {
    camera: String,
    state: Mutex<StreamState>,
    last_failure: Mutex<Option<(FailureKind, String)>>,
    frames_processed: AtomicU64,
    events_emitted: AtomicU64,
    stream_failures: AtomicU64,
    inference_failures: AtomicU64,
    sink_failures: AtomicU64,
}

/// Point-in-time copy of a [`WorkerStatus`].
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub camera: String,
    pub state: StreamState,
    pub frames_processed: u64,
    pub events_emitted: u64,
    pub stream_failures: u64,
    pub inference_failures: u64,
    pub sink_failures: u64,
    pub last_failure: Option<String>,
}

impl WorkerStatus {
    pub fn new(camera: &str) -> Self {
        Self {
            camera: camera.to_string(),
            state: Mutex::new(StreamState::Connecting),
            last_failure: Mutex::new(None),
            frames_processed: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            stream_failures: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: StreamState) {
        let mut current = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *current != state {
            log::debug!("{}: {:?} -> {:?}", self.camera, *current, state);
            *current = state;
        }
    }

    fn record_failure(&self, kind: FailureKind, message: String) {
        let counter = match kind {
            FailureKind::StreamUnavailable => &self.stream_failures,
            FailureKind::InferenceFailed => &self.inference_failures,
            FailureKind::SinkFailed => &self.sink_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        *self
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((kind, message));
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let last_failure = self
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|(kind, message)| format!("{}: {}", kind, message));
        WorkerSnapshot {
            camera: self.camera.clone(),
            state: self.state(),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            stream_failures: self.stream_failures.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            last_failure,
        }
    }
}

/// Everything a worker shares with the other workers.
#[derive(Clone)]
pub struct WorkerContext {
    pub gate: DetectionGate,
    pub filter: DetectionFilter,
    pub cooldown: Arc<CooldownTracker>,
    pub sink: Arc<dyn EventSink>,
    pub settings: WorkerSettings,
}

pub struct CameraWorker {
    camera: CameraConfig,
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    ctx: WorkerContext,
    status: Arc<WorkerStatus>,
    connected: bool,
}

impl CameraWorker {
    pub fn new(
        camera: CameraConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        ctx: WorkerContext,
    ) -> Self {
        let status = Arc::new(WorkerStatus::new(&camera.label()));
        Self {
            camera,
            source,
            detector,
            ctx,
            status,
            connected: false,
        }
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    /// Runs until `shutdown` is triggered, then releases the source.
    pub fn run(mut self, shutdown: &Shutdown) {
        let name = self.camera.label();
        log::info!(
            "{}: worker started (detector {}, source {})",
            name,
            self.detector.name(),
            self.camera.url
        );
        if let Err(e) = self.detector.warm_up() {
            log::warn!("{}: detector warm-up failed: {}", name, e);
        }

        while !shutdown.is_triggered() {
            if self.ctx.gate.is_paused() {
                self.enter_paused();
                if shutdown.wait_timeout(self.ctx.settings.pause_poll_interval) {
                    break;
                }
                continue;
            }
            if self.status.state() == StreamState::Paused {
                self.status.set_state(StreamState::Connecting);
            }

            if !self.connected {
                if let Err(e) = self.source.connect() {
                    self.stream_failed(format!("open failed: {:#}", e));
                    if shutdown.wait_timeout(self.ctx.settings.reconnect_backoff) {
                        break;
                    }
                    continue;
                }
                self.connected = true;
                self.status.set_state(StreamState::Streaming);
                log::info!("{}: streaming", name);
            }

            let frame = match self.source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    self.stream_failed(format!("read failed: {:#}", e));
                    if shutdown.wait_timeout(self.ctx.settings.reconnect_backoff) {
                        break;
                    }
                    continue;
                }
            };

            self.process_frame(&frame);
            drop(frame);

            if shutdown.wait_timeout(self.ctx.settings.detection_interval) {
                break;
            }
        }

        self.source.release();
        self.connected = false;
        self.status.set_state(StreamState::Stopped);
        log::info!("{}: worker stopped", name);
    }

    fn enter_paused(&mut self) {
        if self.connected {
            self.source.release();
            self.connected = false;
        }
        if self.status.state() != StreamState::Paused {
            log::info!("{}: detection paused", self.camera.label());
            self.status.set_state(StreamState::Paused);
        }
    }

    fn stream_failed(&mut self, message: String) {
        log::warn!(
            "{}: {}; retrying in {:?}",
            self.camera.label(),
            message,
            self.ctx.settings.reconnect_backoff
        );
        self.source.release();
        self.connected = false;
        self.status.set_state(StreamState::Reconnecting);
        self.status.record_failure(FailureKind::StreamUnavailable, message);
    }

    /// Detect, filter, cooldown, emit. Never fails; problems become diagnostics.
    fn process_frame(&mut self, frame: &Frame) {
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!("{}: inference failed: {:#}", self.camera.label(), e);
                self.status
                    .record_failure(FailureKind::InferenceFailed, format!("{:#}", e));
                Vec::new()
            }
        };
        self.status.frames_processed.fetch_add(1, Ordering::Relaxed);

        for detection in self.ctx.filter.apply(detections) {
            let label = sanitize_field(&detection.label);
            if label.is_empty() {
                continue;
            }
            if !self
                .ctx
                .cooldown
                .should_emit(&self.camera.room, &label, frame.captured_instant)
            {
                log::trace!("{}: '{}' inside cooldown", self.camera.label(), label);
                continue;
            }
            let image = image_file_name(&self.camera.room, &self.camera.source, &frame.captured_at);
            let event = match DetectionEvent::new(frame.captured_at, &self.camera.room, &label, image) {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("{}: dropping detection: {}", self.camera.label(), e);
                    continue;
                }
            };
            match self.ctx.sink.record(&event, frame) {
                Ok(()) => {
                    self.status.events_emitted.fetch_add(1, Ordering::Relaxed);
                    log::info!(
                        "{}: {} detected ({:.2}) -> {}",
                        self.camera.label(),
                        event.label,
                        detection.confidence,
                        event.image
                    );
                }
                Err(e) => {
                    log::error!("{}: failed to record event: {:#}", self.camera.label(), e);
                    self.status
                        .record_failure(FailureKind::SinkFailed, format!("{:#}", e));
                }
            }
        }
    }
}
