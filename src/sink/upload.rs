use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::EventSink;
use crate::config::UploadSettings;
use crate::frame::Frame;
use crate::shutdown::Shutdown;
use crate::{format_log_timestamp, DetectionEvent};

/// Deterministic key for an event: SHA-256 over `timestamp|room|label`.
///
/// Every retry of the same event carries the same key, so the receiver can
/// discard duplicate deliveries.
pub fn idempotency_key(event: &DetectionEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format_log_timestamp(&event.timestamp).as_bytes());
    hasher.update(b"|");
    hasher.update(event.room.as_bytes());
    hasher.update(b"|");
    hasher.update(event.label.as_bytes());
    hex::encode(hasher.finalize())
}

/// Uploads each event as one HTTP POST: the JPEG still is the body, the event
/// fields travel as query parameters.
///
/// Transport errors and 5xx responses are retried with a fixed delay;
/// 4xx responses are final. A triggered shutdown ends the retry wait early.
pub struct RemoteEventSink {
    endpoint: String,
    agent: ureq::Agent,
    max_attempts: u32,
    retry_delay: Duration,
    shutdown: Shutdown,
}

impl RemoteEventSink {
    pub fn new(settings: &UploadSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(settings.timeout)
            .timeout(settings.timeout)
            .build();
        Self {
            endpoint: settings.endpoint.clone(),
            agent,
            max_attempts: settings.max_attempts.max(1),
            retry_delay: settings.retry_delay,
            shutdown: Shutdown::new(),
        }
    }

    /// Abandons pending retries once `shutdown` is triggered.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn post(&self, event: &DetectionEvent, key: &str, jpeg: &[u8]) -> Result<(), ureq::Error> {
        self.agent
            .post(&self.endpoint)
            .query("timestamp", &format_log_timestamp(&event.timestamp))
            .query("room", &event.room)
            .query("label", &event.label)
            .query("image", &event.image)
            .set("Content-Type", "image/jpeg")
            .set("Idempotency-Key", key)
            .send_bytes(jpeg)
            .map(|_| ())
    }
}

impl EventSink for RemoteEventSink {
    fn record(&self, event: &DetectionEvent, frame: &Frame) -> Result<()> {
        let jpeg = frame.encode_jpeg()?;
        let key = idempotency_key(event);
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match self.post(event, &key, &jpeg) {
                Ok(()) => return Ok(()),
                Err(ureq::Error::Status(code, _)) if code < 500 => {
                    return Err(anyhow!("upload rejected by {} with status {}", self.endpoint, code));
                }
                Err(err) => {
                    last_error = err.to_string();
                    log::warn!(
                        "upload attempt {}/{} for {} failed: {}",
                        attempt,
                        self.max_attempts,
                        event.image,
                        last_error
                    );
                }
            }
            if attempt < self.max_attempts && self.shutdown.wait_timeout(self.retry_delay) {
                return Err(anyhow!(
                    "upload of {} abandoned after {} attempts: shutting down",
                    event.image,
                    attempt
                ));
            }
        }
        Err(anyhow!(
            "upload to {} failed after {} attempts: {}",
            self.endpoint,
            self.max_attempts,
            last_error
        ))
    }
}
