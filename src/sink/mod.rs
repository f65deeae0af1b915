//! Event persistence.
//!
//! A sink records one `DetectionEvent` plus the still it refers to. The local
//! sink writes the JPEG into the screenshot directory and only then appends
//! the log record, so the log never names an image that does not exist.
//! Log appends from different workers are serialized by one lock; image
//! encoding and file writes happen outside it.

mod event_log;
mod local;
mod screenshots;
#[cfg(feature = "upload")]
mod upload;

use anyhow::Result;

use crate::frame::Frame;
use crate::DetectionEvent;

pub use event_log::{CsvEventLog, EventLogStore, InMemoryEventLog, LOG_HEADER};
pub use local::LocalEventSink;
pub use screenshots::ScreenshotStore;
#[cfg(feature = "upload")]
pub use upload::{idempotency_key, RemoteEventSink};

/// Destination for confirmed sightings. Shared by every camera worker.
pub trait EventSink: Send + Sync {
    /// Persist the event and the frame it was detected in.
    ///
    /// Failures are reported to the caller, which drops the event and keeps going.
    fn record(&self, event: &DetectionEvent, frame: &Frame) -> Result<()>;
}
