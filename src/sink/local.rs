use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Mutex;

use super::event_log::{CsvEventLog, EventLogStore};
use super::screenshots::ScreenshotStore;
use super::EventSink;
use crate::frame::Frame;
use crate::DetectionEvent;

/// Screenshot directory + append-only event log on the local filesystem.
pub struct LocalEventSink {
    screenshots: ScreenshotStore,
    log: Mutex<Box<dyn EventLogStore>>,
}

impl LocalEventSink {
    pub fn new<L: EventLogStore + 'static>(screenshots: ScreenshotStore, log: L) -> Self {
        Self {
            screenshots,
            log: Mutex::new(Box::new(log)),
        }
    }

    /// Sink backed by `screenshot_dir` and a CSV log at `log_path`.
    pub fn open(screenshot_dir: &Path, log_path: &Path) -> Result<Self> {
        Ok(Self::new(
            ScreenshotStore::open(screenshot_dir)?,
            CsvEventLog::open(log_path)?,
        ))
    }

    pub fn screenshots(&self) -> &ScreenshotStore {
        &self.screenshots
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<DetectionEvent>> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        log.recent(limit)
    }
}

impl EventSink for LocalEventSink {
    fn record(&self, event: &DetectionEvent, frame: &Frame) -> Result<()> {
        // Encode and write the still before taking the log lock.
        let jpeg = frame.encode_jpeg()?;
        self.screenshots.write(&event.image, &jpeg)?;

        let mut log = self
            .log
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        log.append(event)
    }
}
