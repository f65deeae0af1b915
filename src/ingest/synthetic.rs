//! Synthetic frame source for `stub://` locators.
//!
//! Produces a static scene that changes every `scene_every` frames, so the
//! stub detector reports one sighting per scene change. Query parameters:
//! `width`, `height`, `scene_every`, `frame_ms`.

use anyhow::{anyhow, Result};
use std::time::Duration;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

pub const SCHEME: &str = "stub://";

const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;
const DEFAULT_SCENE_EVERY: u64 = 50;

pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    scene_every: u64,
    frame_delay: Duration,
    connected: bool,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(url: &str, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic source {} needs non-zero dimensions", url));
        }
        Ok(Self {
            url: url.to_string(),
            width,
            height,
            scene_every: DEFAULT_SCENE_EVERY,
            frame_delay: Duration::ZERO,
            connected: false,
            frame_count: 0,
            scene_state: 0,
        })
    }

    /// Parses `stub://name?width=W&height=H&scene_every=N&frame_ms=M`.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| anyhow!("synthetic url must start with {}", SCHEME))?;
        let query = rest.split_once('?').map(|(_, q)| q).unwrap_or("");
        let mut width = DEFAULT_WIDTH;
        let mut height = DEFAULT_HEIGHT;
        let mut scene_every = DEFAULT_SCENE_EVERY;
        let mut frame_ms = 0u64;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed query parameter '{}' in {}", pair, url))?;
            let parsed: u64 = value
                .parse()
                .map_err(|_| anyhow!("query parameter '{}' in {} must be an integer", key, url))?;
            match key {
                "width" => width = u32::try_from(parsed)?,
                "height" => height = u32::try_from(parsed)?,
                "scene_every" => scene_every = parsed.max(1),
                "frame_ms" => frame_ms = parsed,
                other => return Err(anyhow!("unknown query parameter '{}' in {}", other, url)),
            }
        }
        let mut source = Self::new(url, width, height)?;
        source.scene_every = scene_every;
        source.frame_delay = Duration::from_millis(frame_ms);
        Ok(source)
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count > 1 && (self.frame_count - 1).is_multiple_of(self.scene_every) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let pixel_count = (self.width * self.height * 3) as usize;
        (0..pixel_count)
            .map(|i| ((i as u64 + self.scene_state as u64 * 37) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("connected to {} (synthetic)", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("synthetic source {} not connected", self.url));
        }
        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::captured_now(pixels, self.width, self.height)
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            locator: self.url.clone(),
        }
    }
}
