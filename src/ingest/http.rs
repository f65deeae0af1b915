//! HTTP camera source.
//!
//! Handles the two shapes phone/IP camera apps expose:
//! - `multipart/x-mixed-replace` MJPEG streams (one long-lived response)
//! - single JPEG snapshot endpoints (one request per frame)
//!
//! An MJPEG stream is drained by a reader thread that keeps only the newest
//! complete part, so a worker that polls every few seconds never decodes a
//! backlog of stale parts.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use url::Url;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct HttpSource {
    url: String,
    agent: ureq::Agent,
    read_timeout: Duration,
    stream: Option<HttpStream>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
}

enum HttpStream {
    Mjpeg(MjpegReader),
    SingleJpeg,
}

impl HttpSource {
    pub fn new(url: &str, read_timeout: Duration) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("parse camera url {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("unsupported http source scheme '{}'", parsed.scheme()));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(read_timeout)
            .timeout_read(read_timeout)
            .build();
        Ok(Self {
            url: url.to_string(),
            agent,
            read_timeout,
            stream: None,
            connected_at: None,
            last_frame_at: None,
            frame_count: 0,
        })
    }

    fn fetch_single_jpeg(&self) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch jpeg snapshot from {}", self.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .context("read jpeg snapshot")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty jpeg snapshot from {}", self.url));
        }
        Ok(bytes)
    }
}

impl FrameSource for HttpSource {
    fn connect(&mut self) -> Result<()> {
        self.release();
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            let stream = MjpegStream::new(response.into_reader());
            self.stream = Some(HttpStream::Mjpeg(MjpegReader::spawn(stream, &self.url)?));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        log::info!("connected to {} ({})", self.url, content_type);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let frame = match self.stream.as_ref() {
            Some(HttpStream::Mjpeg(reader)) => {
                let part = reader.take_latest(self.read_timeout)?;
                let mut frame = Frame::decode_jpeg(&part.jpeg, part.received_at)?;
                frame.captured_instant = part.received_instant;
                frame
            }
            Some(HttpStream::SingleJpeg) => {
                let jpeg = self.fetch_single_jpeg()?;
                Frame::decode_jpeg(&jpeg, crate::now_local())?
            }
            None => return Err(anyhow!("http source {} not connected", self.url)),
        };
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(frame)
    }

    fn release(&mut self) {
        self.stream = None;
        self.connected_at = None;
    }

    fn is_healthy(&self) -> bool {
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        match self.last_frame_at {
            Some(last) if last >= connected_at => last.elapsed() <= self.read_timeout,
            _ => connected_at.elapsed() <= self.read_timeout,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            locator: self.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

struct MjpegPart {
    jpeg: Vec<u8>,
    received_at: NaiveDateTime,
    received_instant: Instant,
}

#[derive(Default)]
struct LatestPart {
    part: Option<MjpegPart>,
    error: Option<String>,
}

/// Background reader for one MJPEG response. Dropping it stops the thread
/// after its current read returns.
struct MjpegReader {
    shared: Arc<(Mutex<LatestPart>, Condvar)>,
    stop: Arc<AtomicBool>,
}

impl MjpegReader {
    fn spawn(mut stream: MjpegStream, url: &str) -> Result<Self> {
        let shared = Arc::new((Mutex::new(LatestPart::default()), Condvar::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let thread_shared = Arc::clone(&shared);
        let thread_stop = Arc::clone(&stop);
        let url = url.to_string();
        std::thread::Builder::new()
            .name("mjpeg-reader".to_string())
            .spawn(move || {
                let (slot, ready) = &*thread_shared;
                let mut skipped = 0u64;
                while !thread_stop.load(Ordering::Acquire) {
                    let next = stream.read_next_jpeg();
                    let mut latest = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    match next {
                        Ok(jpeg) => {
                            let part = MjpegPart {
                                jpeg,
                                received_at: crate::now_local(),
                                received_instant: Instant::now(),
                            };
                            if latest.part.replace(part).is_some() {
                                skipped += 1;
                            }
                        }
                        Err(e) => {
                            latest.error = Some(format!("{:#}", e));
                            ready.notify_all();
                            break;
                        }
                    }
                    ready.notify_all();
                }
                log::debug!("{}: mjpeg reader exiting ({} stale parts skipped)", url, skipped);
            })
            .context("spawn mjpeg reader thread")?;
        Ok(Self { shared, stop })
    }

    /// Takes the newest part received since the last call, waiting up to
    /// `timeout` for one to arrive.
    fn take_latest(&self, timeout: Duration) -> Result<MjpegPart> {
        let (slot, ready) = &*self.shared;
        let deadline = Instant::now() + timeout;
        let mut latest = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if let Some(part) = latest.part.take() {
                return Ok(part);
            }
            if let Some(err) = &latest.error {
                return Err(anyhow!("mjpeg stream failed: {}", err));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(anyhow!("no mjpeg frame within {:?}", timeout));
            }
            latest = ready
                .wait_timeout(latest, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }
}

impl Drop for MjpegReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Locates the first complete SOI..EOI JPEG in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
