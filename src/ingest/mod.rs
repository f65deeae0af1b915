//! Frame ingestion sources.
//!
//! A source owns one camera connection and hands decoded frames to exactly one
//! worker. Sources:
//! - HTTP MJPEG streams and single-JPEG snapshot endpoints (feature: ingest-http)
//! - Synthetic `stub://` streams (testing, demos)
//!
//! Sources never buffer frames beyond the one being returned and never write
//! frames to disk; persistence is the event sink's job.

#[cfg(feature = "ingest-http")]
pub mod http;
pub mod synthetic;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CameraConfig;
use crate::frame::Frame;

#[cfg(feature = "ingest-http")]
pub use http::HttpSource;
pub use synthetic::SyntheticSource;

/// A camera stream as seen by a worker.
///
/// Errors from `connect` and `next_frame` are recoverable: the worker releases
/// the source, waits, and connects again.
pub trait FrameSource: Send {
    /// Opens (or re-opens) the stream.
    fn connect(&mut self) -> Result<()>;

    /// Blocks until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Drops the underlying connection. Safe to call when not connected.
    fn release(&mut self);

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub locator: String,
}

/// Builds a source for a camera. The supervisor calls it once per camera.
pub type SourceFactory = Arc<dyn Fn(&CameraConfig) -> Result<Box<dyn FrameSource>> + Send + Sync>;

/// Opens a source for `camera` based on the scheme of its locator.
pub fn open_source(camera: &CameraConfig, read_timeout: Duration) -> Result<Box<dyn FrameSource>> {
    let url = camera.url.trim();
    if url.starts_with(synthetic::SCHEME) {
        return Ok(Box::new(SyntheticSource::from_url(url)?));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        return open_http(url, read_timeout);
    }
    Err(anyhow!(
        "camera {} has unsupported stream url '{}'; expected http(s):// or stub://",
        camera.label(),
        url
    ))
}

#[cfg(feature = "ingest-http")]
fn open_http(url: &str, read_timeout: Duration) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(HttpSource::new(url, read_timeout)?))
}

#[cfg(not(feature = "ingest-http"))]
fn open_http(url: &str, _read_timeout: Duration) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "stream url '{}' requires the ingest-http feature",
        url
    ))
}

/// Factory that opens every camera through [`open_source`].
pub fn default_source_factory(read_timeout: Duration) -> SourceFactory {
    Arc::new(move |camera: &CameraConfig| open_source(camera, read_timeout))
}
