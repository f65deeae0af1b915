//! Room Guardian
//!
//! This crate implements the detection pipeline behind a small multi-room
//! camera deployment: every configured camera is watched by its own worker,
//! frames are run through an object detector, and sightings of the configured
//! target labels are recorded as timestamped events with a still image.
//!
//! # Architecture
//!
//! - `ingest`: Frame sources (HTTP MJPEG/JPEG cameras, synthetic `stub://` streams)
//! - `detect`: Detector backends, backend registry, label allow-list filter
//! - `cooldown`: Per-(room, label) suppression window
//! - `sink`: Event log + screenshot persistence, optional remote upload
//! - `control`: Global pause/resume gate and the `guardianctl` CLI
//! - `worker`: Per-camera control loop (connect, pull, infer, filter, emit)
//! - `supervisor`: Starts one worker per camera, owns shutdown
//! - `api`: Loopback control/query API
//! - Core types: `DetectionEvent`, timestamp formats, identifier validation

use anyhow::{anyhow, Result};
use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};

pub mod api;
pub mod config;
pub mod control;
pub mod cooldown;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod shutdown;
pub mod sink;
pub mod supervisor;
pub mod worker;

pub use config::{CameraConfig, GuardianConfig};
pub use control::{DetectionGate, DetectionState, FileStateStore, InMemoryStateStore, StateStore};
pub use cooldown::CooldownTracker;
pub use detect::{BackendRegistry, Detection, DetectionFilter, DetectorBackend, DetectorFactory};
pub use frame::Frame;
pub use ingest::{FrameSource, SourceFactory, SourceStats};
pub use shutdown::Shutdown;
pub use sink::{
    CsvEventLog, EventLogStore, EventSink, InMemoryEventLog, LocalEventSink, ScreenshotStore,
};
pub use supervisor::{Supervisor, SupervisorHandle};
pub use worker::{
    CameraWorker, FailureKind, StreamState, WorkerContext, WorkerSettings, WorkerSnapshot,
    WorkerStatus,
};

// -------------------- Timestamps --------------------

/// Timestamp layout used in the event log (`2024-05-01 13:07:42`).
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timestamp layout used in screenshot file names (`2024-05-01_13-07-42`).
///
/// Fixed width and zero padded, so names sort in capture order.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Rendered length of [`FILE_TIMESTAMP_FORMAT`].
pub const FILE_TIMESTAMP_LEN: usize = 19;

/// Current local wall-clock time truncated to whole seconds.
pub fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local().trunc_subsecs(0)
}

pub fn format_log_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(LOG_TIMESTAMP_FORMAT).to_string()
}

pub fn parse_log_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), LOG_TIMESTAMP_FORMAT)
        .map_err(|e| anyhow!("invalid event timestamp '{}': {}", raw, e))
}

/// Screenshot name for a still captured by `source` in `room` at `ts`.
pub fn image_file_name(room: &str, source: &str, ts: &NaiveDateTime) -> String {
    format!("{}_{}_{}.jpg", room, source, ts.format(FILE_TIMESTAMP_FORMAT))
}

// -------------------- Events --------------------

/// A confirmed sighting. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionEvent {
    #[serde(with = "log_timestamp")]
    pub timestamp: NaiveDateTime,
    pub room: String,
    pub label: String,
    /// File name of the still, relative to the screenshot directory.
    pub image: String,
}

impl DetectionEvent {
    pub fn new(timestamp: NaiveDateTime, room: &str, label: &str, image: String) -> Result<Self> {
        let room = sanitize_field(room);
        let label = sanitize_field(label);
        if room.is_empty() {
            return Err(anyhow!("detection event requires a room"));
        }
        if label.is_empty() {
            return Err(anyhow!("detection event requires a label"));
        }
        Ok(Self {
            timestamp: timestamp.trunc_subsecs(0),
            room,
            label,
            image: sanitize_field(&image),
        })
    }
}

mod log_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_log_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_log_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

// -------------------- Identifiers --------------------

/// Strips characters that would break the comma/newline delimited event log.
pub fn sanitize_field(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ',' | '\n' | '\r' | '"'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Validates a room or source identifier.
///
/// Identifiers end up in log records and screenshot file names, so they must
/// not contain delimiters or path separators.
pub fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("{} must not be empty", kind));
    }
    if value.len() > 64 {
        return Err(anyhow!("{} '{}' exceeds 64 characters", kind, value));
    }
    if let Some(bad) = value
        .chars()
        .find(|c| matches!(c, ',' | '/' | '\\' | '"' | '\n' | '\r' | '\0'))
    {
        return Err(anyhow!("{} '{}' contains forbidden character {:?}", kind, value, bad));
    }
    if value == "." || value == ".." {
        return Err(anyhow!("{} '{}' is not a valid name", kind, value));
    }
    Ok(())
}
