use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{format_log_timestamp, parse_log_timestamp, DetectionEvent};

/// Header row of the CSV event log. The first three columns are the stable
/// record layout; `image` was appended later.
pub const LOG_HEADER: &str = "timestamp,room,label,image";

/// Append-only event log.
pub trait EventLogStore: Send {
    fn append(&mut self, ev: &DetectionEvent) -> Result<()>;

    /// Up to `limit` most recent events, newest first.
    fn recent(&mut self, limit: usize) -> Result<Vec<DetectionEvent>>;
}

/// Comma-separated text log, one record per line.
///
/// Field values never contain commas or newlines (`DetectionEvent::new`
/// strips them), so no quoting is needed.
#[derive(Debug)]
pub struct CsvEventLog {
    path: PathBuf,
}

impl CsvEventLog {
    /// Opens (or creates) the log, writing the header into a new file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log directory {}", parent.display()))?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open event log {}", path.display()))?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", LOG_HEADER)?;
            file.sync_data()?;
        }
        Ok(Self { path })
    }

    /// Opens an existing log for reading without creating it.
    pub fn open_existing(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(anyhow!("event log {} does not exist", path.display()));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLogStore for CsvEventLog {
    fn append(&mut self, ev: &DetectionEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open event log {}", self.path.display()))?;
        file.write_all(format_record(ev).as_bytes())
            .with_context(|| format!("append to event log {}", self.path.display()))?;
        file.sync_data()?;
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<DetectionEvent>> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read event log {}", self.path.display()))?;
        let mut events: Vec<DetectionEvent> = Vec::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line == LOG_HEADER || line.starts_with("timestamp,") {
                continue;
            }
            match parse_record(line) {
                Ok(ev) => events.push(ev),
                Err(e) => log::debug!("skipping event log line {}: {}", lineno + 1, e),
            }
        }
        Ok(events.into_iter().rev().take(limit).collect())
    }
}

fn format_record(ev: &DetectionEvent) -> String {
    format!(
        "{},{},{},{}\n",
        format_log_timestamp(&ev.timestamp),
        ev.room,
        ev.label,
        ev.image
    )
}

/// Parses `timestamp,room,label[,image]`. Records from before the image
/// column existed have three fields.
pub(crate) fn parse_record(line: &str) -> Result<DetectionEvent> {
    let mut fields = line.splitn(4, ',');
    let timestamp = fields.next().ok_or_else(|| anyhow!("missing timestamp"))?;
    let room = fields.next().ok_or_else(|| anyhow!("missing room"))?;
    let label = fields.next().ok_or_else(|| anyhow!("missing label"))?;
    let image = fields.next().unwrap_or("").trim().to_string();
    DetectionEvent::new(parse_log_timestamp(timestamp)?, room, label, image)
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryEventLog {
    events: Vec<DetectionEvent>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[DetectionEvent] {
        &self.events
    }
}

impl EventLogStore for InMemoryEventLog {
    fn append(&mut self, ev: &DetectionEvent) -> Result<()> {
        self.events.push(ev.clone());
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<DetectionEvent>> {
        Ok(self.events.iter().rev().take(limit).cloned().collect())
    }
}
